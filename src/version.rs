//! STOMP protocol version negotiation.

use std::fmt;
use std::str::FromStr;

use crate::error::StompError;

/// A negotiated STOMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StompVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl StompVersion {
    /// All versions this crate understands, lowest first.
    pub const ALL: [StompVersion; 3] = [StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2];

    pub fn as_str(self) -> &'static str {
        match self {
            StompVersion::V1_0 => "1.0",
            StompVersion::V1_1 => "1.1",
            StompVersion::V1_2 => "1.2",
        }
    }

    /// The comma-separated list of all supported versions, as used in
    /// `accept-version` and in the `version` header of an "Incompatible
    /// version" ERROR reply.
    pub fn supported_list() -> &'static str {
        "1.0,1.1,1.2"
    }

    /// Picks the highest version present in both `Self::ALL` and `accept`
    /// (a raw `accept-version` header value, comma-separated). A missing
    /// `accept-version` header negotiates 1.0; an empty intersection is a
    /// protocol error.
    pub fn negotiate(accept_version: Option<&str>) -> Result<StompVersion, StompError> {
        let accept_version = match accept_version {
            None => return Ok(StompVersion::V1_0),
            Some(v) => v,
        };
        let offered: Vec<StompVersion> = accept_version
            .split(',')
            .filter_map(|v| StompVersion::from_str(v.trim()).ok())
            .collect();
        offered
            .into_iter()
            .max()
            .ok_or_else(|| {
                StompError::protocol("Incompatible version")
                    .with_extra_header("version", StompVersion::supported_list())
            })
    }
}

impl FromStr for StompVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(StompVersion::V1_0),
            "1.1" => Ok(StompVersion::V1_1),
            "1.2" => Ok(StompVersion::V1_2),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StompVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_highest_common_version() {
        assert_eq!(
            StompVersion::negotiate(Some("1.0,1.1,1.2")).unwrap(),
            StompVersion::V1_2
        );
        assert_eq!(StompVersion::negotiate(Some("1.0")).unwrap(), StompVersion::V1_0);
    }

    #[test]
    fn missing_header_defaults_to_1_0() {
        assert_eq!(StompVersion::negotiate(None).unwrap(), StompVersion::V1_0);
    }

    #[test]
    fn no_overlap_is_protocol_error() {
        let err = StompVersion::negotiate(Some("2.0,3.0")).unwrap_err();
        assert!(matches!(err, StompError::Protocol { .. }));
    }
}
