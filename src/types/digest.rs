use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use data_encoding::HEXLOWER;
use ring::digest;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    pub algo: String,
    pub hash: String,
}

impl Digest {
    pub fn from_sha256(digest: &digest::Digest) -> Digest {
        Digest {
            algo: "sha256".to_string(),
            hash: HEXLOWER.encode(digest.as_ref()),
        }
    }

    pub fn sha256_of(bytes: &[u8]) -> Digest {
        Digest::from_sha256(&digest::digest(&digest::SHA256, bytes))
    }
}

impl FromStr for Digest {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((algo, hash)) if !algo.is_empty() && !hash.is_empty() => Ok(Digest {
                algo: algo.to_string(),
                hash: hash.to_string(),
            }),
            _ => Err("not an <algo>:<hex> digest"),
        }
    }
}

// We implement this so that serde_json can parse a Digest from a straight string
impl TryFrom<String> for Digest {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// We implement this so that serde_json can serialize a Digest struct into a string
impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        format!("{digest}")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, self.hash)
    }
}
