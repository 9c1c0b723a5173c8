//! Minimal PEM armour for certificates and private keys.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::IdentityError;

const LINE_WIDTH: usize = 64;

/// Wrap `data` in a `-----BEGIN <label>-----` block
pub fn encode(label: &str, data: &[u8]) -> String {
    let body = STANDARD.encode(data);
    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 64);
    out.push_str(&format!("-----BEGIN {}-----\n", label));
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is always ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", label));
    out
}

/// Extract the bytes of the first block labelled `label`
pub fn decode(label: &str, text: &str) -> Result<Vec<u8>, IdentityError> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = text
        .find(&begin)
        .ok_or_else(|| IdentityError::Pem(format!("missing {} header", label)))?
        + begin.len();
    let stop = text[start..]
        .find(&end)
        .ok_or_else(|| IdentityError::Pem(format!("missing {} footer", label)))?
        + start;

    let body: String = text[start..stop]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    STANDARD
        .decode(body)
        .map_err(|e| IdentityError::Pem(format!("invalid base64 in {} block: {}", label, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_lines() {
        let data = vec![7u8; 200];
        let pem = encode("CERTIFICATE", &data);
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|l| l.len() <= LINE_WIDTH || l.starts_with("-----")));
        assert_eq!(decode("CERTIFICATE", &pem).unwrap(), data);
    }

    #[test]
    fn test_decode_wrong_label() {
        let pem = encode("PRIVATE KEY", b"secret");
        let err = decode("CERTIFICATE", &pem).unwrap_err();
        assert!(matches!(err, IdentityError::Pem(_)));
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let pem = encode("CERTIFICATE", b"hello world").replace('\n', "\r\n");
        assert_eq!(decode("CERTIFICATE", &pem).unwrap(), b"hello world");
    }
}
