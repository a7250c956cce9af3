use aes::{
    Aes256,
    cipher::{
        BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
        block_padding::Pkcs7, generic_array::GenericArray,
    },
};
use types::DownloadError;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Decrypts a depot payload: a 16-byte AES-256-ECB encrypted IV followed by
/// the AES-256-CBC body, PKCS7 padded. Used for both chunks and manifests.
pub fn decrypt_payload(key: &[u8; 32], payload: &[u8]) -> Result<Vec<u8>, DownloadError> {
    if payload.len() < 32 || (payload.len() - 16) % 16 != 0 {
        return Err(DownloadError::ChecksumMismatch(format!(
            "encrypted payload has impossible length {}",
            payload.len()
        )));
    }

    let cipher = Aes256::new(key.into());
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&payload[..16]);
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut iv));

    let mut body = payload[16..].to_vec();
    let plaintext = Aes256CbcDec::new(key.into(), GenericArray::from_slice(&iv))
        .decrypt_padded_mut::<Pkcs7>(&mut body)
        .map_err(|_| {
            DownloadError::ChecksumMismatch("payload failed to decrypt cleanly".to_string())
        })?;
    Ok(plaintext.to_vec())
}

/// Inverse of [`decrypt_payload`], for CDN emulators and tests.
pub fn encrypt_payload(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256::new(key.into());
    let mut out = Vec::with_capacity(16 + plaintext.len() + 16);

    let mut iv_block = *iv;
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut iv_block));
    out.extend_from_slice(&iv_block);

    let encrypted = Aes256CbcEnc::new(key.into(), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    out.extend_from_slice(&encrypted);
    out
}
