use serde::{Deserialize, Serialize};

/// Raw icon of a feed or category as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Turns icons into the bytes stored in the `icon` BLOB columns and back.
///
/// Injected into [`Database`](super::Database) at construction time so that
/// embedders can store icons in whatever representation their UI layer wants.
pub trait IconCodec: Send + Sync {
    fn encode(&self, icon: &Icon) -> Vec<u8>;

    /// Returns `None` when the stored bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Option<Icon>;
}

/// Default codec: the content type, a NUL byte, then the image bytes as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawIconCodec;

impl IconCodec for RawIconCodec {
    fn encode(&self, icon: &Icon) -> Vec<u8> {
        if icon.content_type.contains('\0') {
            tracing::warn!(content_type = %icon.content_type, "Icon content type contains NUL, storing none");
            return Vec::new();
        }
        let mut bytes = Vec::with_capacity(icon.content_type.len() + 1 + icon.data.len());
        bytes.extend_from_slice(icon.content_type.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&icon.data);
        bytes
    }

    fn decode(&self, bytes: &[u8]) -> Option<Icon> {
        let split = bytes.iter().position(|&b| b == 0)?;
        let (content_type, rest) = bytes.split_at(split);
        if content_type.is_empty() {
            return None;
        }
        Some(Icon {
            content_type: std::str::from_utf8(content_type).ok()?.to_owned(),
            data: rest[1..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Icon {
        Icon {
            content_type: "image/png".to_string(),
            data: vec![0x89, b'P', b'N', b'G', 0, 0xff],
        }
    }

    #[test]
    fn test_raw_codec_round_trip() {
        let codec = RawIconCodec;
        assert_eq!(codec.decode(&codec.encode(&png())), Some(png()));

        let empty = Icon {
            content_type: "image/gif".to_string(),
            data: Vec::new(),
        };
        assert_eq!(codec.decode(&codec.encode(&empty)), Some(empty));
    }

    #[test]
    fn test_raw_codec_stores_image_bytes_without_inflation() {
        let icon = Icon {
            content_type: "image/x-icon".to_string(),
            data: (0..=255u8).cycle().take(4096).collect(),
        };
        let encoded = RawIconCodec.encode(&icon);
        assert_eq!(encoded.len(), icon.content_type.len() + 1 + icon.data.len());
        assert!(encoded.ends_with(&icon.data));
    }

    #[test]
    fn test_raw_codec_rejects_garbage() {
        assert_eq!(RawIconCodec.decode(b""), None);
        assert_eq!(RawIconCodec.decode(b"image/png"), None);
        assert_eq!(RawIconCodec.decode(b"\x00\x01"), None);
        assert_eq!(RawIconCodec.decode(b"\xff\xfe\x00\x01"), None);
    }

    #[test]
    fn test_raw_codec_refuses_nul_in_content_type() {
        let icon = Icon {
            content_type: "image\0png".to_string(),
            data: vec![1],
        };
        assert!(RawIconCodec.encode(&icon).is_empty());
    }
}
