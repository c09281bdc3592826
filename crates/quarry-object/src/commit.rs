use bstr::BString;
use quarry_hash::ObjectId;

use crate::ObjectError;

/// A commit object.
///
/// Author and committer are kept as the raw header lines; the storage core
/// records them verbatim and leaves identity/date interpretation to the
/// layers that render history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Id of the root tree.
    pub tree: ObjectId,
    /// Parent commit ids, empty for a root commit.
    pub parents: Vec<ObjectId>,
    /// Raw author line (`name <email> timestamp tz`).
    pub author: BString,
    /// Raw committer line.
    pub committer: BString,
    /// Headers this core does not interpret, preserved for round-trip.
    /// Multi-line values keep their embedded newlines.
    pub extra_headers: Vec<(BString, BString)>,
    /// Message body: everything after the blank separator line.
    pub message: BString,
}

impl Commit {
    /// Parse commit content (no framing header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<ObjectId> = None;
        let mut parents = Vec::new();
        let mut author: Option<BString> = None;
        let mut committer: Option<BString> = None;
        let mut extra_headers: Vec<(BString, BString)> = Vec::new();

        let mut pos = 0;
        while pos < content.len() {
            // Blank line separates headers from the message.
            if content[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = line_end(content, pos);
            let line = &content[pos..line_end];

            let space = line.iter().position(|&b| b == b' ').ok_or_else(|| {
                ObjectError::InvalidHeader("commit header line without space".into())
            })?;
            let key = &line[..space];
            let value = &line[space + 1..];

            match key {
                b"tree" => tree = Some(parse_id(value)?),
                b"parent" => parents.push(parse_id(value)?),
                b"author" => author = Some(BString::from(value)),
                b"committer" => committer = Some(BString::from(value)),
                _ => {
                    // Continuation lines (leading space) belong to the
                    // previous header, e.g. signatures.
                    let (value, next) = take_continuations(content, value, line_end);
                    extra_headers.push((BString::from(key), value));
                    pos = next;
                    continue;
                }
            }
            pos = line_end + 1;
        }

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitField { field: "author" })?,
            committer: committer.ok_or(ObjectError::MissingCommitField { field: "committer" })?,
            extra_headers,
            message: BString::from(&content[pos.min(content.len())..]),
        })
    }

    /// Serialize commit content (no framing header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');

        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }

        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author);
        out.push(b'\n');

        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer);
        out.push(b'\n');

        for (key, value) in &self.extra_headers {
            out.extend_from_slice(key);
            out.push(b' ');
            // Re-indent embedded newlines as continuation lines.
            for (i, part) in value.split(|&b| b == b'\n').enumerate() {
                if i > 0 {
                    out.push(b'\n');
                    out.push(b' ');
                }
                out.extend_from_slice(part);
            }
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

fn parse_id(value: &[u8]) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader("non-UTF8 object id".into()))?;
    Ok(ObjectId::from_hex(hex)?)
}

fn line_end(data: &[u8], from: usize) -> usize {
    data[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| p + from)
        .unwrap_or(data.len())
}

/// Collect continuation lines (leading space) following a header line.
/// Returns the assembled value and the position after the last line consumed.
fn take_continuations(data: &[u8], first: &[u8], first_line_end: usize) -> (BString, usize) {
    let mut value = Vec::from(first);
    let mut next = first_line_end + 1;
    while next < data.len() && data[next] == b' ' {
        value.push(b'\n');
        let cont_end = line_end(data, next);
        value.extend_from_slice(&data[next + 1..cont_end]);
        next = cont_end + 1;
    }
    (BString::from(value), next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE_HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    const PARENT_HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    fn sample() -> Commit {
        Commit {
            tree: ObjectId::from_hex(TREE_HEX).unwrap(),
            parents: vec![ObjectId::from_hex(PARENT_HEX).unwrap()],
            author: BString::from("A U Thor <author@example.com> 1700000000 +0000"),
            committer: BString::from("C O Mitter <committer@example.com> 1700000001 +0000"),
            extra_headers: Vec::new(),
            message: BString::from("subject line\n\nbody\n"),
        }
    }

    #[test]
    fn roundtrip() {
        let commit = sample();
        let bytes = commit.serialize_content();
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn root_commit_has_no_parents() {
        let mut commit = sample();
        commit.parents.clear();
        let parsed = Commit::parse(&commit.serialize_content()).unwrap();
        assert!(parsed.parents.is_empty());
    }

    #[test]
    fn multiple_parents_preserved_in_order() {
        let mut commit = sample();
        commit
            .parents
            .push(ObjectId::from_hex(TREE_HEX).unwrap());
        let parsed = Commit::parse(&commit.serialize_content()).unwrap();
        assert_eq!(parsed.parents.len(), 2);
        assert_eq!(parsed.parents, commit.parents);
    }

    #[test]
    fn missing_tree_rejected() {
        let content = b"author a <a@a> 0 +0000\ncommitter a <a@a> 0 +0000\n\nmsg";
        assert!(matches!(
            Commit::parse(content),
            Err(ObjectError::MissingCommitField { field: "tree" })
        ));
    }

    #[test]
    fn missing_author_rejected() {
        let content = format!("tree {TREE_HEX}\ncommitter c <c@c> 0 +0000\n\nmsg");
        assert!(matches!(
            Commit::parse(content.as_bytes()),
            Err(ObjectError::MissingCommitField { field: "author" })
        ));
    }

    #[test]
    fn multiline_extra_header_roundtrip() {
        let mut commit = sample();
        commit.extra_headers.push((
            BString::from("gpgsig"),
            BString::from("-----BEGIN-----\nline2\n-----END-----"),
        ));
        let bytes = commit.serialize_content();
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn empty_message_ok() {
        let mut commit = sample();
        commit.message = BString::from("");
        let parsed = Commit::parse(&commit.serialize_content()).unwrap();
        assert_eq!(parsed.message, commit.message);
    }
}
