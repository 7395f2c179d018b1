//! License key validation.
//!
//! A license key is five groups of five ASCII alphanumerics separated by
//! hyphens, e.g. `ABCDE-FGHIJ-KLMNO-PQRST-UVWXY`. Input is uppercased
//! before the check. Whether the scale accepts a well-formed key is only
//! known after the authentication handshake.

use crate::error::{Error, Result};

/// Number of hyphen-separated groups in a key.
pub const LICENSE_KEY_GROUPS: usize = 5;

/// Number of characters in each group.
pub const LICENSE_KEY_GROUP_LEN: usize = 5;

/// A syntactically valid, normalized license key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Normalize and validate a license key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LicenseFormat`] if the key does not have the
    /// five-group shape.
    ///
    /// # Example
    ///
    /// ```
    /// use kgiton_ble::LicenseKey;
    ///
    /// let key = LicenseKey::parse("abcde-fghij-klmno-pqrst-uvwxy").unwrap();
    /// assert_eq!(key.as_str(), "ABCDE-FGHIJ-KLMNO-PQRST-UVWXY");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.to_ascii_uppercase();
        check_shape(&normalized).map_err(|reason| Error::LicenseFormat { reason })?;
        Ok(Self(normalized))
    }

    /// The normalized key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes written to the control characteristic during authentication.
    pub fn to_payload(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

// Keys are credentials; keep them out of logs.
impl std::fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LicenseKey({}-*****-*****-*****-*****)", &self.0[..LICENSE_KEY_GROUP_LEN])
    }
}

impl std::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for LicenseKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for LicenseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check whether a string is a well-formed license key (case-insensitive).
pub fn is_valid_license_key(input: &str) -> bool {
    check_shape(&input.to_ascii_uppercase()).is_ok()
}

fn check_shape(key: &str) -> std::result::Result<(), String> {
    let groups: Vec<&str> = key.split('-').collect();

    if groups.len() != LICENSE_KEY_GROUPS {
        return Err(format!(
            "expected {} groups, found {}",
            LICENSE_KEY_GROUPS,
            groups.len()
        ));
    }

    for (i, group) in groups.iter().enumerate() {
        if group.len() != LICENSE_KEY_GROUP_LEN {
            return Err(format!(
                "group {} has {} characters, expected {}",
                i + 1,
                group.len(),
                LICENSE_KEY_GROUP_LEN
            ));
        }

        if !group
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(format!("group {} contains invalid characters", i + 1));
        }
    }

    Ok(())
}
