use bstr::BString;
use quarry_hash::ObjectId;

use crate::{ObjectError, ObjectKind};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Id of the tagged object.
    pub object: ObjectId,
    /// Kind of the tagged object.
    pub target_kind: ObjectKind,
    /// Tag name.
    pub name: BString,
    /// Raw tagger line, if present.
    pub tagger: Option<BString>,
    /// Message body.
    pub message: BString,
}

impl Tag {
    /// Parse tag content (no framing header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut object: Option<ObjectId> = None;
        let mut target_kind: Option<ObjectKind> = None;
        let mut name: Option<BString> = None;
        let mut tagger: Option<BString> = None;

        let mut pos = 0;
        while pos < content.len() {
            if content[pos] == b'\n' {
                pos += 1;
                break;
            }
            let line_end = content[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(content.len());
            let line = &content[pos..line_end];

            if let Some(space) = line.iter().position(|&b| b == b' ') {
                let (key, value) = (&line[..space], &line[space + 1..]);
                match key {
                    b"object" => {
                        let hex = std::str::from_utf8(value).map_err(|_| {
                            ObjectError::InvalidHeader("non-UTF8 object id".into())
                        })?;
                        object = Some(ObjectId::from_hex(hex)?);
                    }
                    b"type" => target_kind = Some(ObjectKind::from_bytes(value)?),
                    b"tag" => name = Some(BString::from(value)),
                    b"tagger" => tagger = Some(BString::from(value)),
                    _ => {}
                }
            }
            pos = line_end + 1;
        }

        Ok(Self {
            object: object.ok_or(ObjectError::MissingTagField { field: "object" })?,
            target_kind: target_kind.ok_or(ObjectError::MissingTagField { field: "type" })?,
            name: name.ok_or(ObjectError::MissingTagField { field: "tag" })?,
            tagger,
            message: BString::from(&content[pos.min(content.len())..]),
        })
    }

    /// Serialize tag content (no framing header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.object.to_hex().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_kind.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');
        if let Some(ref tagger) = self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(tagger);
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tag {
        Tag {
            object: ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap(),
            target_kind: ObjectKind::Commit,
            name: BString::from("v1.0.0"),
            tagger: Some(BString::from("T Agger <tagger@example.com> 1700000000 +0000")),
            message: BString::from("release\n"),
        }
    }

    #[test]
    fn roundtrip() {
        let tag = sample();
        let parsed = Tag::parse(&tag.serialize_content()).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn tagger_is_optional() {
        let mut tag = sample();
        tag.tagger = None;
        let parsed = Tag::parse(&tag.serialize_content()).unwrap();
        assert_eq!(parsed.tagger, None);
    }

    #[test]
    fn missing_object_rejected() {
        let content = b"type commit\ntag v1\n\nmsg";
        assert!(matches!(
            Tag::parse(content),
            Err(ObjectError::MissingTagField { field: "object" })
        ));
    }
}
