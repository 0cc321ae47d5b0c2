//! Hashing - SHA-256 for Published Files
//!
//! Used to confirm copied artifacts are byte-for-byte identical to their source.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streaming SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lens.nk");
        let data = b"LD_3DE4_Anamorphic_Standard_Degree_4 {\n}\n";
        fs::write(&path, data).unwrap();
        assert_eq!(file_sha256(&path).unwrap(), sha256_hex(data));
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(file_sha256(Path::new("/no/such/lens.nk")).is_err());
    }
}
