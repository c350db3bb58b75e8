//! Timed transcript produced by the transcribe stage.

use serde::{Deserialize, Serialize};

/// A single word with timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    /// Start time in seconds from the beginning of the source
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// The word text
    pub text: String,
}

/// A sentence-level transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment start in seconds
    pub start: f64,
    /// Segment end in seconds
    pub end: f64,
    /// Full segment text
    pub text: String,
    /// Word-level timings within the segment
    pub words: Vec<Word>,
}

/// Full timed transcript for a job's audio.
///
/// An empty transcript is a valid outcome (silent media); downstream stages
/// treat it as "no speech detected" rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Whether no speech was detected.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.words.is_empty())
    }

    /// Total number of words.
    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }

    /// Iterate all words in time order.
    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.segments.iter().flat_map(|s| s.words.iter())
    }

    /// Words whose start falls within `[start, end)`.
    pub fn words_between(&self, start: f64, end: f64) -> Vec<&Word> {
        self.words()
            .filter(|w| w.start >= start && w.start < end)
            .collect()
    }

    /// End timestamp of the last word, or 0.0 when empty.
    pub fn speech_end(&self) -> f64 {
        self.words().map(|w| w.end).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(start: f64, end: f64, text: &str) -> Word {
        Word {
            start,
            end,
            text: text.to_string(),
        }
    }

    fn sample() -> Transcript {
        Transcript {
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.0,
                    text: "hello world".to_string(),
                    words: vec![word(0.0, 0.8, "hello"), word(0.9, 1.6, "world")],
                },
                TranscriptSegment {
                    start: 2.5,
                    end: 4.0,
                    text: "goodbye now".to_string(),
                    words: vec![word(2.5, 3.1, "goodbye"), word(3.2, 3.9, "now")],
                },
            ],
        }
    }

    #[test]
    fn empty_transcript() {
        assert!(Transcript::default().is_empty());
        assert!(!sample().is_empty());

        // Segments without words still count as empty
        let t = Transcript {
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.0,
                text: String::new(),
                words: vec![],
            }],
        };
        assert!(t.is_empty());
    }

    #[test]
    fn words_between_window() {
        let t = sample();
        let words = t.words_between(0.5, 3.0);
        let texts: Vec<_> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["world", "goodbye"]);
    }

    #[test]
    fn speech_end_is_last_word_end() {
        assert_eq!(sample().speech_end(), 3.9);
        assert_eq!(Transcript::default().speech_end(), 0.0);
    }
}
