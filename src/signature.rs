use openssl::{bn::BigNumRef, ecdsa::EcdsaSig, hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::{
    base64::Base64,
    key_pair::{KeyAlgorithm, KeyPair},
};

/// 定義簽名操作可能遇到的錯誤類型。簽名失敗代表金鑰材料有問題，不可重試。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(#[from] openssl::error::ErrorStack),
    #[error("Malformed ECDSA signature")]
    MalformedEcdsa,
}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 所需的簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RS256：RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ES256：P-256 上的 ECDSA 搭配 SHA-256。
///
/// OpenSSL 產出 DER 編碼的 `(r, s)`，JWS 要求固定長度的 `r || s`（各 32 位元組）。
struct EcdsaP256Signature;

impl EcdsaP256Signature {
    const COMPONENT_LEN: i32 = 32;

    fn pad(component: &BigNumRef) -> Result<Vec<u8>, SignatureError> {
        if component.num_bytes() > Self::COMPONENT_LEN {
            return Err(SignatureError::MalformedEcdsa);
        }
        Ok(component.to_vec_padded(Self::COMPONENT_LEN)?)
    }
}

impl SignatureAlgorithmT for EcdsaP256Signature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = Self::pad(sig.r())?;
        raw.extend(Self::pad(sig.s())?);
        Ok(raw)
    }
}

/// 簽名演算法工廠，根據金鑰演算法取得對應的實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
        match alg {
            KeyAlgorithm::EcdsaP256 => Box::new(EcdsaP256Signature),
            KeyAlgorithm::Rsa(_) => Box::new(RsaSignature),
        }
    }
}

/// 根據提供的 header、payload 與金鑰對，生成 JWS 簽名。
///
/// 簽名輸入為 `base64url(protected) || "." || base64url(payload)`，
/// 結果以 Base64 形式回傳。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.as_str(), payload_b64.as_str());
    let algorithm = SignatureAlgorithmFactory::get_algorithm(key_pair.alg);

    let signature = algorithm.sign(signing_input.as_bytes(), key_pair)?;

    Ok(Base64::new(signature))
}

#[cfg(test)]
mod tests {
    use openssl::{ecdsa::EcdsaSig, hash::MessageDigest, sign::Verifier};

    use super::*;
    use crate::testing::rfc7515_key;

    #[test]
    fn test_es256_signature_is_raw_and_verifies() {
        let key = rfc7515_key();
        let header = Base64::new(r#"{"alg":"ES256"}"#);
        let payload = Base64::new("{}");

        let raw = create_signature(&header, &payload, &key)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(raw.len(), 64);

        let r = openssl::bn::BigNum::from_slice(&raw[..32]).unwrap();
        let s = openssl::bn::BigNum::from_slice(&raw[32..]).unwrap();
        let der = EcdsaSig::from_private_components(r, s)
            .unwrap()
            .to_der()
            .unwrap();

        let mut verifier = Verifier::new(MessageDigest::sha256(), &key.pub_key).unwrap();
        verifier
            .update(format!("{}.{}", header, payload).as_bytes())
            .unwrap();
        assert!(verifier.verify(&der).unwrap());
    }

    #[test]
    fn test_rs256_signature_verifies() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa(2048)).unwrap();
        let header = Base64::new(r#"{"alg":"RS256"}"#);
        let payload = Base64::empty();

        let sig = create_signature(&header, &payload, &key).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key.pub_key).unwrap();
        verifier.update(format!("{}.", header).as_bytes()).unwrap();
        assert!(verifier.verify(&sig.decode().unwrap()).unwrap());
    }
}
