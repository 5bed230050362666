/// Header is the routing header of a Container: where a message came
/// from, where it's going, what it is, and an application version tag.
///
/// The binary wire format carries the five routing strings; `version`
/// is a textual-codec concern (the wire has its own format version byte).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub source_id: String,
    pub source_sub_id: String,
    pub target_id: String,
    pub target_sub_id: String,
    pub message_type: String,
    pub version: String,
}

pub const DEFAULT_VERSION: &str = "1.0";

impl Default for Header {
    fn default() -> Self {
        Self {
            source_id: String::new(),
            source_sub_id: String::new(),
            target_id: String::new(),
            target_sub_id: String::new(),
            message_type: String::new(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap source and target (both id and sub-id) in one step, turning
    /// a request header into its reply header. Applying twice restores
    /// the original.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.source_id, &mut self.target_id);
        std::mem::swap(&mut self.source_sub_id, &mut self.target_sub_id);
    }

    /// This header with source and target swapped.
    pub fn swapped(&self) -> Self {
        let mut out = self.clone();
        out.swap();
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_swap_is_an_involution() {
        let mut header = Header {
            source_id: "svc".to_string(),
            source_sub_id: "worker-3".to_string(),
            target_id: "db".to_string(),
            target_sub_id: "shard-1".to_string(),
            message_type: "req".to_string(),
            version: "2.1".to_string(),
        };
        let original = header.clone();

        header.swap();
        assert_eq!(header.source_id, "db");
        assert_eq!(header.source_sub_id, "shard-1");
        assert_eq!(header.target_id, "svc");
        assert_eq!(header.target_sub_id, "worker-3");
        // Message type and version are not routing state.
        assert_eq!(header.message_type, "req");
        assert_eq!(header.version, "2.1");

        header.swap();
        assert_eq!(header, original);
    }

    #[test]
    fn test_default_version() {
        assert_eq!(Header::new().version, DEFAULT_VERSION);
    }
}
