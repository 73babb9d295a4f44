//! Cryptographic primitives: digests, key material, and the PKCS#7 signature block.

pub mod cert;
pub mod cms;
pub mod digest;

pub use self::cert::{PublicKey, SigningCredentials, SigningKey};
pub use self::cms::{SignatureBlock, SignatureBlockBuilder};
pub use self::digest::{DigestAlgorithm, Hasher};
