//! Incremental parsing of newline-delimited provider frames.

/// Splits a byte stream into complete lines. Partial lines, including split
/// UTF-8 sequences, are held until their terminating newline arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=position).collect::<Vec<u8>>();
            let frame = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim()
                .to_string();
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Whatever is left once the body has ended without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let frame = String::from_utf8_lossy(&rest).trim().to_string();
        (!frame.is_empty()).then_some(frame)
    }
}

/// Text carried in the frame's `content` field. Returns `None` when the field
/// is absent or its string literal is unterminated.
pub fn extract_content_delta(frame: &str) -> Option<String> {
    extract_string_field(frame, "content")
}

pub fn extract_error_message(frame: &str) -> Option<String> {
    extract_string_field(frame, "error")
}

pub fn is_done_frame(frame: &str) -> bool {
    field_value_start(frame, "done").is_some_and(|rest| rest.starts_with("true"))
}

fn extract_string_field(frame: &str, field: &str) -> Option<String> {
    let rest = field_value_start(frame, field)?;
    let mut chars = rest.strip_prefix('"')?.chars();
    let mut value = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => return Some(value),
            '\\' => match chars.next()? {
                'n' => value.push('\n'),
                '"' => value.push('"'),
                '\\' => value.push('\\'),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            },
            _ => value.push(ch),
        }
    }

    None
}

/// Text following `"field"` and its colon, with surrounding whitespace removed.
fn field_value_start<'a>(frame: &'a str, field: &str) -> Option<&'a str> {
    let key = format!("\"{field}\"");
    let mut search_from = 0;

    while let Some(offset) = frame[search_from..].find(&key) {
        let after_key = search_from + offset + key.len();
        let rest = frame[after_key..].trim_start();
        if let Some(value) = rest.strip_prefix(':') {
            return Some(value.trim_start());
        }
        search_from = after_key;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{FrameBuffer, extract_content_delta, extract_error_message, is_done_frame};

    #[test]
    fn content_is_extracted_and_unescaped() {
        let frame = r#"{"model":"llama3","message":{"role":"assistant","content":"Hi \"there\"\nline\\two"},"done":false}"#;
        assert_eq!(
            extract_content_delta(frame).as_deref(),
            Some("Hi \"there\"\nline\\two")
        );
        assert!(!is_done_frame(frame));
    }

    #[test]
    fn unknown_escapes_are_kept_verbatim() {
        let frame = r#"{"message":{"content":"tab\there é"}}"#;
        assert_eq!(
            extract_content_delta(frame).as_deref(),
            Some(r"tab\there é")
        );
    }

    #[test]
    fn done_frame_is_detected_with_or_without_spaces() {
        assert!(is_done_frame(r#"{"message":{"content":""},"done":true}"#));
        assert!(is_done_frame(r#"{"done" : true, "total_duration": 5}"#));
        assert!(!is_done_frame(r#"{"done_reason":"stop"}"#));
    }

    #[test]
    fn missing_or_unterminated_content_yields_none() {
        assert_eq!(extract_content_delta(r#"{"done":false}"#), None);
        assert_eq!(extract_content_delta(r#"{"message":{"content":"cut"#), None);
        assert_eq!(
            extract_content_delta(r#"{"message":{"content":""}}"#).as_deref(),
            Some("")
        );
    }

    #[test]
    fn error_frames_expose_their_message() {
        assert_eq!(
            extract_error_message(r#"{"error":"model \"nope\" not found"}"#).as_deref(),
            Some("model \"nope\" not found")
        );
    }

    #[test]
    fn frame_buffer_reassembles_split_lines() {
        let mut buffer = FrameBuffer::default();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\n\n{\"b\":2}\n{\"c\""), vec![
            "{\"a\":1}".to_string(),
            "{\"b\":2}".to_string()
        ]);
        assert_eq!(buffer.finish().as_deref(), Some("{\"c\""));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn frame_buffer_keeps_multibyte_characters_intact() {
        let mut buffer = FrameBuffer::default();
        let bytes = "{\"content\":\"é\"}\n".as_bytes();
        let split = bytes.iter().position(|byte| *byte == 0xC3).expect("lead byte") + 1;

        assert!(buffer.push(&bytes[..split]).is_empty());
        let frames = buffer.push(&bytes[split..]);
        assert_eq!(extract_content_delta(&frames[0]).as_deref(), Some("é"));
    }
}
