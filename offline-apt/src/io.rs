// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{OfflineAptError, Result},
    digest::DynDigest,
    std::{
        fmt::Formatter,
        io::{BufRead, BufReader, Read},
        path::Path,
    },
};

/// Checksum type / digest mechanism advertised by index stanzas.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Emit variants in their preferred usage order.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }

    /// Name of the field in `Packages` stanzas holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest.trim())
            .map_err(|e| OfflineAptError::DigestBadHex(digest.to_string(), e))?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Compute the digest of everything a reader yields.
    pub fn from_reader(checksum: ChecksumType, mut reader: impl Read) -> Result<Self> {
        let mut hasher = checksum.new_hasher();
        let mut buf = [0u8; 32768];

        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            hasher.update(&buf[0..count]);
        }

        let digest = hasher.finalize().to_vec();

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// Verify a file on disk has an expected size and/or content digest.
pub fn verify_file(path: &Path, size: Option<u64>, digest: Option<&ContentDigest>) -> Result<()> {
    let display = format!("{}", path.display());

    if let Some(expected) = size {
        let got = std::fs::metadata(path)
            .map_err(|e| OfflineAptError::IoPath(display.clone(), e))?
            .len();

        if got != expected {
            return Err(OfflineAptError::SizeMismatch {
                path: display,
                expected,
                got,
            });
        }
    }

    if let Some(expected) = digest {
        let fh = std::fs::File::open(path)
            .map_err(|e| OfflineAptError::IoPath(display.clone(), e))?;
        let got = ContentDigest::from_reader(expected.checksum_type(), fh)?;

        if &got != expected {
            return Err(OfflineAptError::DigestMismatch {
                path: display,
                expected: expected.digest_hex(),
                got: got.digest_hex(),
            });
        }
    }

    Ok(())
}

/// Compression format of index files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    Gzip,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
        }
    }

    /// Infer the compression of a path from its extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            _ => Self::None,
        }
    }
}

/// Wrap a reader with transparent decompression.
///
/// A gzip stream with a bad header fails here. Corruption later in the stream
/// surfaces as an I/O error while reading.
pub fn read_decompressed<'a>(
    stream: impl Read + 'a,
    compression: Compression,
) -> Result<Box<dyn BufRead + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(BufReader::new(stream)),
        Compression::Gzip => Box::new(BufReader::new(libflate::gzip::Decoder::new(stream)?)),
    })
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Write};

    #[test]
    fn digest_verification() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("file");
        std::fs::write(&path, b"hello world")?;

        let sha256 = ContentDigest::from_hex_digest(
            ChecksumType::Sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        )?;
        let md5 =
            ContentDigest::from_hex_digest(ChecksumType::Md5, "5eb63bbbe01eeed093cb22bb8f5acdc3")?;

        verify_file(&path, Some(11), Some(&sha256))?;
        verify_file(&path, None, Some(&md5))?;

        assert!(matches!(
            verify_file(&path, Some(12), None),
            Err(OfflineAptError::SizeMismatch { expected: 12, got: 11, .. })
        ));

        let wrong = ContentDigest::from_hex_digest(ChecksumType::Sha256, &"00".repeat(32))?;
        assert!(matches!(
            verify_file(&path, None, Some(&wrong)),
            Err(OfflineAptError::DigestMismatch { .. })
        ));

        assert!(matches!(
            ContentDigest::from_hex_digest(ChecksumType::Md5, "zz"),
            Err(OfflineAptError::DigestBadHex(..))
        ));

        Ok(())
    }

    #[test]
    fn gzip_roundtrip_reader() -> Result<()> {
        let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
        encoder.write_all(b"Package: foo\n\n")?;
        let data = encoder.finish().into_result()?;

        let mut reader = read_decompressed(std::io::Cursor::new(data), Compression::Gzip)?;
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        assert_eq!(s, "Package: foo\n\n");

        assert!(read_decompressed(
            std::io::Cursor::new(b"not gzip".to_vec()),
            Compression::Gzip
        )
        .is_err());

        assert_eq!(
            Compression::from_path(Path::new("x_Packages.gz")),
            Compression::Gzip
        );

        Ok(())
    }
}
