//! Splits a page snapshot into oracle-sized chunks.
//!
//! Segment boundaries fall before a tag or after a newline, never inside a
//! `<select>`, `<textarea>`, `<button>` or `<label>` element. Segments are then
//! packed greedily up to the chunk budget, with the last few segments of each
//! chunk repeated at the start of the next so a label and its control are not
//! separated. A segment larger than the budget becomes its own chunk.

/// A slice of the snapshot handed to the oracle in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub text: String,
}

/// Elements whose markup is never split.
const ATOMIC_ELEMENTS: [&str; 4] = ["select", "textarea", "button", "label"];

enum TagEffect {
    Open,
    Close,
    Neutral,
}

fn tag_effect(tag: &str) -> TagEffect {
    let inner = tag.trim_start_matches('<');
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    if !ATOMIC_ELEMENTS.contains(&name.as_str()) {
        return TagEffect::Neutral;
    }
    if closing {
        TagEffect::Close
    } else if tag.trim_end_matches('>').ends_with('/') {
        TagEffect::Neutral
    } else {
        TagEffect::Open
    }
}

/// End of the tag starting at `start` (exclusive). Quoted attribute values
/// and comment bodies may contain `>`.
fn tag_end(html: &str, start: usize) -> usize {
    if html[start..].starts_with("<!--") {
        return html[start..]
            .find("-->")
            .map(|offset| start + offset + 3)
            .unwrap_or(html.len());
    }
    let mut quote: Option<u8> = None;
    for (offset, byte) in html.as_bytes()[start..].iter().enumerate() {
        match (quote, *byte) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*byte),
            (None, b'>') => return start + offset + 1,
            (None, _) => {}
        }
    }
    html.len()
}

fn push_segment<'a>(segments: &mut Vec<&'a str>, segment: &'a str) {
    if !segment.trim().is_empty() {
        segments.push(segment);
    }
}

/// Splits a snapshot into indivisible segments. Whitespace-only segments are dropped.
pub fn segment_snapshot(snapshot: &str) -> Vec<&str> {
    let bytes = snapshot.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut idx = 0;

    while idx < bytes.len() {
        match bytes[idx] {
            b'<' => {
                if depth == 0 && idx > start {
                    push_segment(&mut segments, &snapshot[start..idx]);
                    start = idx;
                }
                let end = tag_end(snapshot, idx);
                match tag_effect(&snapshot[idx..end]) {
                    TagEffect::Open => depth += 1,
                    TagEffect::Close => depth = depth.saturating_sub(1),
                    TagEffect::Neutral => {}
                }
                idx = end;
            }
            b'\n' if depth == 0 => {
                push_segment(&mut segments, &snapshot[start..idx + 1]);
                start = idx + 1;
                idx += 1;
            }
            _ => idx += 1,
        }
    }
    if start < bytes.len() {
        push_segment(&mut segments, &snapshot[start..]);
    }
    segments
}

/// Packs segments into chunks of at most `max_chars` bytes, carrying
/// `overlap_segments` trailing segments into the next chunk when they fit.
pub fn chunk_snapshot(snapshot: &str, max_chars: usize, overlap_segments: usize) -> Vec<Chunk> {
    let segments = segment_snapshot(snapshot);
    let max_chars = max_chars.max(1);

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut size = 0usize;

    for (i, segment) in segments.iter().enumerate() {
        if !current.is_empty() && size + segment.len() > max_chars {
            let carry_from = current.len().saturating_sub(overlap_segments);
            let carried: Vec<usize> = current[carry_from..].to_vec();
            groups.push(std::mem::take(&mut current));

            size = carried.iter().map(|&j| segments[j].len()).sum();
            if size + segment.len() <= max_chars {
                current = carried;
            } else {
                size = 0;
            }
        }
        current.push(i);
        size += segment.len();
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let total = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| Chunk {
            index,
            total,
            text: group.iter().map(|&i| segments[i]).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: usize) -> String {
        (0..fields)
            .map(|i| {
                format!(
                    "<div class=\"field\">\n<label for=\"q{i}\">Question {i}</label>\n<input id=\"q{i}\" name=\"q{i}\">\n</div>\n"
                )
            })
            .collect()
    }

    #[test]
    fn test_small_snapshot_is_single_chunk() {
        let html = form(2);
        let chunks = chunk_snapshot(&html, 50_000, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total, 1);
    }

    #[test]
    fn test_empty_snapshot_has_no_chunks() {
        assert!(chunk_snapshot("   \n  ", 100, 1).is_empty());
    }

    #[test]
    fn test_chunks_respect_budget_and_cover_every_segment() {
        let html = form(40);
        let chunks = chunk_snapshot(&html, 300, 1);
        assert!(chunks.len() > 1);

        for chunk in &chunks {
            assert!(chunk.text.len() <= 300, "chunk {} too large", chunk.index);
            assert_eq!(chunk.total, chunks.len());
        }
        for segment in segment_snapshot(&html) {
            assert!(
                chunks.iter().any(|c| c.text.contains(segment)),
                "segment lost: {segment:?}"
            );
        }
    }

    #[test]
    fn test_select_is_never_split() {
        let options: String = (0..50)
            .map(|i| format!("<option value=\"{i}\">Option {i}</option>\n"))
            .collect();
        let html = format!("<p>intro</p>\n<select id=\"country\">\n{options}</select>\n<p>outro</p>\n");
        let select_len = html.find("</select>").unwrap() + "</select>".len() - html.find("<select").unwrap();

        let chunks = chunk_snapshot(&html, 200, 0);
        let holder: Vec<&Chunk> = chunks.iter().filter(|c| c.text.contains("<select")).collect();
        assert_eq!(holder.len(), 1);
        assert!(holder[0].text.contains("</select>"));
        assert!(holder[0].text.len() >= select_len);
    }

    #[test]
    fn test_overlap_repeats_trailing_segment() {
        let html = "<p>alpha</p>\n<p>bravo</p>\n<p>charlie</p>\n";
        let chunks = chunk_snapshot(html, 30, 1);
        assert!(chunks.len() >= 2);
        let first_tail = segment_snapshot(&chunks[0].text).last().unwrap().to_string();
        assert!(chunks[1].text.starts_with(&first_tail));
    }

    #[test]
    fn test_quoted_angle_bracket_stays_in_its_tag() {
        let html = "<p>Pay</p>\n<input placeholder=\"e.g. > 100k\" id=\"salary\">\n<!-- a > b -->\n<p>end</p>\n";
        let segments = segment_snapshot(html);
        assert!(segments.contains(&"<input placeholder=\"e.g. > 100k\" id=\"salary\">\n"));
        assert!(segments.contains(&"<!-- a > b -->\n"));
    }

    #[test]
    fn test_minified_html_still_segments() {
        let html = "<form><input id=\"a\"><input id=\"b\"><textarea id=\"c\">x</textarea></form>";
        let segments = segment_snapshot(html);
        assert!(segments.len() >= 4);
        assert!(segments.contains(&"<textarea id=\"c\">x</textarea>"));
    }
}
