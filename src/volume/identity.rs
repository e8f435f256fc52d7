//! Volume Identity Codec
//!
//! The orchestrator persists only the opaque volume id, so the id itself
//! records how the volume was provisioned. Two shapes exist:
//!
//! ```text
//! fs-0123456789abcdef0                          whole filesystem
//! <dns-name>:<mount-name>:<base-path>:<sub>:<sub>  sub-path on a shared filesystem
//! ```
//!
//! The shared shape repeats the sub-path in its last two fields. The
//! duplicate is kept for compatibility with ids already handed out and is
//! always derived from the single stored sub-path.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Separator between id fields
pub const VOLUME_ID_DELIMITER: char = ':';

/// Field count of the whole-filesystem shape
const FILESYSTEM_FIELDS: usize = 1;
/// Field count of the shared-filesystem shape
const SHARED_FIELDS: usize = 5;

const EXPECTED_SHAPES: &str =
    "either <filesystem-id> or <dns-name>:<mount-name>:<base-path>:<subpath>:<subpath>";

// =============================================================================
// Raw Field Codec
// =============================================================================

/// Join fields with the delimiter. Empty fields are legal; a field containing
/// the delimiter is rejected since it would make decoding ambiguous.
pub fn encode_fields<S: AsRef<str>>(fields: &[S]) -> Result<String> {
    let mut fields_out = Vec::with_capacity(fields.len());
    for field in fields {
        let field = field.as_ref();
        if field.contains(VOLUME_ID_DELIMITER) {
            return Err(Error::DelimiterInField {
                field: field.to_string(),
                delimiter: VOLUME_ID_DELIMITER,
            });
        }
        fields_out.push(field);
    }
    Ok(fields_out.join(&VOLUME_ID_DELIMITER.to_string()))
}

/// Split an id into its fields, accepting only the two recognized shapes
pub fn decode_fields(volume_id: &str) -> Result<Vec<String>> {
    let fields: Vec<String> = volume_id
        .split(VOLUME_ID_DELIMITER)
        .map(str::to_string)
        .collect();

    match fields.len() {
        FILESYSTEM_FIELDS | SHARED_FIELDS => Ok(fields),
        n => Err(Error::MalformedVolumeId {
            volume_id: volume_id.to_string(),
            expected: format!("{} (got {} fields)", EXPECTED_SHAPES, n),
        }),
    }
}

// =============================================================================
// Shared Volume Id
// =============================================================================

/// Location of a sub-path volume inside a shared filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedVolumeId {
    dns_name: String,
    mount_name: String,
    base_path: String,
    subpath: String,
}

impl SharedVolumeId {
    /// Build a shared id, validating every field
    pub fn new(
        dns_name: impl Into<String>,
        mount_name: impl Into<String>,
        base_path: impl Into<String>,
        subpath: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            dns_name: dns_name.into(),
            mount_name: mount_name.into(),
            base_path: base_path.into(),
            subpath: subpath.into(),
        };

        for field in [&id.dns_name, &id.mount_name, &id.base_path, &id.subpath] {
            if field.contains(VOLUME_ID_DELIMITER) {
                return Err(Error::DelimiterInField {
                    field: field.clone(),
                    delimiter: VOLUME_ID_DELIMITER,
                });
            }
        }
        if id.dns_name.is_empty() || id.mount_name.is_empty() || id.subpath.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "dns name, mount name and subpath must be non-empty (got {:?}, {:?}, {:?})",
                id.dns_name, id.mount_name, id.subpath
            )));
        }

        Ok(id)
    }

    pub fn dns_name(&self) -> &str {
        &self.dns_name
    }

    pub fn mount_name(&self) -> &str {
        &self.mount_name
    }

    /// Base path inside the shared filesystem; empty means the root
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    /// The five on-wire fields, with the sub-path repeated
    pub fn fields(&self) -> [&str; SHARED_FIELDS] {
        [
            &self.dns_name,
            &self.mount_name,
            &self.base_path,
            &self.subpath,
            &self.subpath,
        ]
    }
}

// =============================================================================
// Volume Id
// =============================================================================

/// Decoded volume identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeId {
    /// One backing filesystem is one volume
    Filesystem { filesystem_id: String },
    /// A sub-path (directory or fileset) on a shared filesystem
    Shared(SharedVolumeId),
}

impl VolumeId {
    /// Whole-filesystem id
    pub fn filesystem(filesystem_id: impl Into<String>) -> Result<Self> {
        let filesystem_id = filesystem_id.into();
        if filesystem_id.is_empty() {
            return Err(Error::MalformedVolumeId {
                volume_id: filesystem_id,
                expected: EXPECTED_SHAPES.into(),
            });
        }
        if filesystem_id.contains(VOLUME_ID_DELIMITER) {
            return Err(Error::DelimiterInField {
                field: filesystem_id,
                delimiter: VOLUME_ID_DELIMITER,
            });
        }
        Ok(VolumeId::Filesystem { filesystem_id })
    }

    /// Parse an opaque id handed back by the orchestrator
    pub fn parse(volume_id: &str) -> Result<Self> {
        let mut fields = decode_fields(volume_id)?;

        if fields.len() == FILESYSTEM_FIELDS {
            return Self::filesystem(fields.remove(0));
        }

        let malformed = |reason: &str| Error::MalformedVolumeId {
            volume_id: volume_id.to_string(),
            expected: format!("{} ({})", EXPECTED_SHAPES, reason),
        };

        if fields[3] != fields[4] {
            return Err(malformed("subpath fields differ"));
        }

        fields.truncate(4);
        let subpath = fields.pop().unwrap_or_default();
        let base_path = fields.pop().unwrap_or_default();
        let mount_name = fields.pop().unwrap_or_default();
        let dns_name = fields.pop().unwrap_or_default();

        SharedVolumeId::new(dns_name, mount_name, base_path, subpath)
            .map(VolumeId::Shared)
            .map_err(|e| malformed(&e.to_string()))
    }

    /// Encode to the opaque on-wire form
    pub fn encode(&self) -> String {
        match self {
            VolumeId::Filesystem { filesystem_id } => filesystem_id.clone(),
            // Fields were validated on construction
            VolumeId::Shared(shared) => shared.fields().join(&VOLUME_ID_DELIMITER.to_string()),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, VolumeId::Shared(_))
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for VolumeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_encode_shared_fields() {
        let encoded = encode_fields(&["dns1", "mnt1", "base", "sub", "sub"]).unwrap();
        assert_eq!(encoded, "dns1:mnt1:base:sub:sub");

        let decoded = decode_fields(&encoded).unwrap();
        assert_eq!(decoded, vec!["dns1", "mnt1", "base", "sub", "sub"]);
    }

    #[test]
    fn test_field_round_trip() {
        let tuples: Vec<Vec<&str>> = vec![
            vec!["fs-0123456789abcdef0"],
            vec!["fs-1.fsx.us-east-1.amazonaws.com", "abcdef12", "", "pvc-1", "pvc-1"],
            vec!["dns", "mnt", "team/a/b", "pvc-2", "pvc-2"],
            vec!["", "", "", "", ""],
        ];
        for fields in tuples {
            let encoded = encode_fields(&fields).unwrap();
            assert_eq!(decode_fields(&encoded).unwrap(), fields);
        }
    }

    #[test]
    fn test_encode_rejects_delimiter() {
        let err = encode_fields(&["dns", "m:nt", "", "sub", "sub"]).unwrap_err();
        assert_matches!(err, Error::DelimiterInField { field, .. } if field == "m:nt");
    }

    #[test]
    fn test_decode_reports_shapes() {
        let err = decode_fields("a:b:c").unwrap_err();
        assert_matches!(&err, Error::MalformedVolumeId { volume_id, .. } if volume_id == "a:b:c");
        let message = err.to_string();
        assert!(message.contains("a:b:c"));
        assert!(message.contains("<filesystem-id>"));
        assert!(message.contains("got 3 fields"));
    }

    #[test]
    fn test_parse_filesystem_id() {
        let id = VolumeId::parse("fs-0123456789abcdef0").unwrap();
        assert_eq!(
            id,
            VolumeId::Filesystem {
                filesystem_id: "fs-0123456789abcdef0".into()
            }
        );
        assert_eq!(id.to_string(), "fs-0123456789abcdef0");
        assert!(VolumeId::parse("").is_err());
    }

    #[test]
    fn test_parse_shared_id() {
        let id: VolumeId = "dns1:mnt1:base:sub:sub".parse().unwrap();
        let VolumeId::Shared(shared) = &id else {
            panic!("expected shared id, got {id:?}");
        };
        assert_eq!(shared.dns_name(), "dns1");
        assert_eq!(shared.mount_name(), "mnt1");
        assert_eq!(shared.base_path(), "base");
        assert_eq!(shared.subpath(), "sub");
        assert_eq!(id.encode(), "dns1:mnt1:base:sub:sub");
    }

    #[test]
    fn test_parse_shared_empty_base_path() {
        let id = VolumeId::parse("dns1:mnt1::sub:sub").unwrap();
        assert!(id.is_shared());
        assert_eq!(id.encode(), "dns1:mnt1::sub:sub");
    }

    #[test]
    fn test_parse_rejects_diverging_subpaths() {
        let err = VolumeId::parse("dns1:mnt1:base:sub:other").unwrap_err();
        assert_matches!(err, Error::MalformedVolumeId { .. });
    }

    #[test]
    fn test_parse_rejects_empty_subpath() {
        let err = VolumeId::parse("dns1:mnt1:base::").unwrap_err();
        assert_matches!(err, Error::MalformedVolumeId { .. });
    }

    #[test]
    fn test_shared_id_rejects_delimiter() {
        let err = SharedVolumeId::new("dns", "mnt", "a:b", "sub").unwrap_err();
        assert_matches!(err, Error::DelimiterInField { .. });
    }
}
