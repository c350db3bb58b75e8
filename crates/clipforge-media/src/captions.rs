//! Karaoke caption rendering.
//!
//! Captions are a single line of 3-word phrases with the currently spoken
//! word highlighted via ASS karaoke timing. The three styles differ only in
//! typography; layout and timing are shared.

use std::fmt::Write as _;

use clipforge_models::{CaptionStyle, Transcript, Word};

/// Words grouped per caption line.
const WORDS_PER_LINE: usize = 3;

/// Typography tuple for a caption style.
#[derive(Debug, Clone, Copy)]
pub struct StyleSpec {
    pub font: &'static str,
    pub size: u32,
    /// Colour of the already-spoken (highlighted) portion, ASS &HBBGGRR
    pub highlight_colour: &'static str,
    /// Colour of the not-yet-spoken portion
    pub base_colour: &'static str,
    pub outline: u32,
    pub bold: bool,
    /// 1 = outline+shadow, 3 = opaque box
    pub border_style: u32,
    pub uppercase: bool,
}

impl StyleSpec {
    pub fn for_style(style: CaptionStyle) -> Self {
        match style {
            CaptionStyle::Modern => Self {
                font: "Arial Black",
                size: 48,
                highlight_colour: "&H0000FFFF", // yellow
                base_colour: "&H00FFFFFF",
                outline: 3,
                bold: true,
                border_style: 1,
                uppercase: true,
            },
            CaptionStyle::Classic => Self {
                font: "Arial",
                size: 40,
                highlight_colour: "&H00FFFF00", // cyan
                base_colour: "&H00FFFFFF",
                outline: 2,
                bold: false,
                border_style: 3,
                uppercase: false,
            },
            CaptionStyle::Minimal => Self {
                font: "Helvetica",
                size: 36,
                highlight_colour: "&H00FFFFFF",
                base_colour: "&H00DDDDDD",
                outline: 1,
                bold: false,
                border_style: 1,
                uppercase: false,
            },
        }
    }
}

/// Render an ASS subtitle document for the words spoken within
/// `[clip_start, clip_end)` of the source. Timestamps in the document are
/// relative to the clip.
///
/// Returns `None` when no words fall inside the window.
pub fn render_ass(
    transcript: &Transcript,
    clip_start: f64,
    clip_end: f64,
    style: CaptionStyle,
) -> Option<String> {
    let words = transcript.words_between(clip_start, clip_end);
    if words.is_empty() {
        return None;
    }

    let spec = StyleSpec::for_style(style);
    let mut doc = String::new();

    writeln!(doc, "[Script Info]").ok()?;
    writeln!(doc, "Title: clipforge captions").ok()?;
    writeln!(doc, "ScriptType: v4.00+").ok()?;
    writeln!(doc, "PlayResX: 1080").ok()?;
    writeln!(doc, "PlayResY: 1920").ok()?;
    writeln!(doc).ok()?;
    writeln!(doc, "[V4+ Styles]").ok()?;
    writeln!(
        doc,
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding"
    )
    .ok()?;
    writeln!(
        doc,
        "Style: Default,{font},{size},{highlight},{base},&H00000000,&H80000000,{bold},0,0,0,\
         100,100,0,0,{border},{outline},1,2,40,40,120,1",
        font = spec.font,
        size = spec.size,
        highlight = spec.highlight_colour,
        base = spec.base_colour,
        bold = if spec.bold { -1 } else { 0 },
        border = spec.border_style,
        outline = spec.outline,
    )
    .ok()?;
    writeln!(doc).ok()?;
    writeln!(doc, "[Events]").ok()?;
    writeln!(
        doc,
        "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text"
    )
    .ok()?;

    for phrase in words.chunks(WORDS_PER_LINE) {
        let line_start = (phrase[0].start - clip_start).max(0.0);
        let line_end = (phrase.last()?.end - clip_start).max(line_start + 0.5);

        let mut text = String::new();
        for (i, word) in phrase.iter().enumerate() {
            let duration_cs = word_duration_cs(word, phrase.get(i + 1).copied());
            let rendered = if spec.uppercase {
                word.text.to_uppercase()
            } else {
                word.text.clone()
            };
            if i > 0 {
                text.push(' ');
            }
            write!(text, "{{\\k{}}}{}", duration_cs, rendered).ok()?;
        }

        writeln!(
            doc,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            format_ass_time(line_start),
            format_ass_time(line_end),
            text
        )
        .ok()?;
    }

    Some(doc)
}

/// Karaoke duration of a word in centiseconds, extended to the start of the
/// following word so the highlight does not flicker between words.
fn word_duration_cs(word: &Word, next: Option<&Word>) -> u32 {
    let end = next.map(|n| n.start).unwrap_or(word.end).max(word.end);
    (((end - word.start) * 100.0).round() as i64).max(1) as u32
}

/// Format seconds as an ASS timestamp (H:MM:SS.CC).
fn format_ass_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let hours = (secs / 3600.0) as u32;
    let minutes = ((secs % 3600.0) / 60.0) as u32;
    let seconds = secs % 60.0;
    format!("{}:{:02}:{:05.2}", hours, minutes, seconds)
}

/// FFmpeg video filter that burns a rendered ASS file.
pub fn caption_filter(ass_path: &std::path::Path) -> String {
    // ':' and '\' are filter-option metacharacters
    let escaped = ass_path
        .to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:");
    format!("ass={}", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_models::TranscriptSegment;

    fn transcript() -> Transcript {
        let words: Vec<Word> = (0..6)
            .map(|i| Word {
                start: 10.0 + i as f64 * 0.5,
                end: 10.0 + i as f64 * 0.5 + 0.4,
                text: format!("word{}", i),
            })
            .collect();
        Transcript {
            segments: vec![TranscriptSegment {
                start: 10.0,
                end: 13.0,
                text: "six words in this sample here".into(),
                words,
            }],
        }
    }

    #[test]
    fn ass_time_format() {
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
        assert_eq!(format_ass_time(75.25), "0:01:15.25");
        assert_eq!(format_ass_time(3661.5), "1:01:01.50");
        assert_eq!(format_ass_time(-3.0), "0:00:00.00");
    }

    #[test]
    fn renders_phrases_of_three_words() {
        let doc = render_ass(&transcript(), 10.0, 14.0, CaptionStyle::Modern).unwrap();
        let dialogue_lines: Vec<&str> = doc
            .lines()
            .filter(|l| l.starts_with("Dialogue:"))
            .collect();
        assert_eq!(dialogue_lines.len(), 2);
        // Each line carries one karaoke tag per word
        assert_eq!(dialogue_lines[0].matches("\\k").count(), 3);
    }

    #[test]
    fn timestamps_are_clip_relative() {
        let doc = render_ass(&transcript(), 10.0, 14.0, CaptionStyle::Classic).unwrap();
        let first = doc.lines().find(|l| l.starts_with("Dialogue:")).unwrap();
        // First word starts at source 10.0 == clip 0.0
        assert!(first.contains("0:00:00.00"));
    }

    #[test]
    fn modern_uppercases_words() {
        let doc = render_ass(&transcript(), 10.0, 14.0, CaptionStyle::Modern).unwrap();
        assert!(doc.contains("WORD0"));

        let doc = render_ass(&transcript(), 10.0, 14.0, CaptionStyle::Minimal).unwrap();
        assert!(doc.contains("word0"));
    }

    #[test]
    fn window_outside_speech_renders_nothing() {
        assert!(render_ass(&transcript(), 100.0, 115.0, CaptionStyle::Modern).is_none());
        assert!(render_ass(&Transcript::default(), 0.0, 15.0, CaptionStyle::Modern).is_none());
    }

    #[test]
    fn karaoke_durations_extend_to_next_word() {
        let a = Word { start: 0.0, end: 0.3, text: "a".into() };
        let b = Word { start: 0.5, end: 0.9, text: "b".into() };
        // Extends through the 0.3-0.5 gap
        assert_eq!(word_duration_cs(&a, Some(&b)), 50);
        // Last word uses its own end
        assert_eq!(word_duration_cs(&b, None), 40);
    }

    #[test]
    fn filter_escapes_path() {
        let filter = caption_filter(std::path::Path::new("/tmp/work/captions.ass"));
        assert_eq!(filter, "ass=/tmp/work/captions.ass");

        let filter = caption_filter(std::path::Path::new("C:\\work\\c.ass"));
        assert!(filter.contains("\\:"));
    }
}
