use crate::models::SourceDocument;
use crate::wire::StreamEvent;
use regex::Regex;
use std::sync::OnceLock;

fn whitespace_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern compiles"))
}

/// Splits `text` into alternating words and whitespace runs, dropping empty pieces.
fn split_keeping_whitespace(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut last = 0;

    for run in whitespace_runs().find_iter(text) {
        if run.start() > last {
            tokens.push(&text[last..run.start()]);
        }
        tokens.push(run.as_str());
        last = run.end();
    }

    if last < text.len() {
        tokens.push(&text[last..]);
    }

    tokens
}

fn is_whitespace(token: &str) -> bool {
    token.chars().all(char::is_whitespace)
}

/// Reassembles streamed fragments into whole words and whitespace runs.
///
/// A trailing word is held back until whitespace (or the end of the stream)
/// proves it complete, so a word split across fragments is emitted once.
#[derive(Debug, Default)]
pub struct TokenAssembler {
    pending: String,
}

impl TokenAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let buffer = std::mem::take(&mut self.pending);
        let mut tokens = split_keeping_whitespace(&buffer);

        if let Some(last) = tokens.last() {
            if !is_whitespace(last) {
                self.pending = (*last).to_string();
                tokens.pop();
            }
        }

        tokens.into_iter().map(str::to_string).collect()
    }

    /// Emits whatever is still held back, complete or not.
    pub fn finish(&mut self) -> Vec<String> {
        if self.pending.is_empty() {
            Vec::new()
        } else {
            vec![std::mem::take(&mut self.pending)]
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Client-side view of one answer: cited sources plus the words received so far.
#[derive(Debug, Default)]
pub struct ChatTranscript {
    assembler: TokenAssembler,
    pub sources: Vec<SourceDocument>,
    pub words: Vec<String>,
    pub error: Option<String>,
    pub finished: bool,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event and returns the words it completed.
    pub fn apply(&mut self, event: StreamEvent) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }

        let completed = match event {
            StreamEvent::SourceReference { id, name, path } => {
                self.sources.push(SourceDocument {
                    id,
                    file_name: name,
                    file_path: path,
                });
                Vec::new()
            }
            StreamEvent::Content { content } => self.assembler.push(&content),
            StreamEvent::Error { message } => {
                self.error = Some(message);
                self.finished = true;
                self.assembler.finish()
            }
            StreamEvent::End => {
                self.finished = true;
                self.assembler.finish()
            }
        };

        self.words.extend(completed.iter().cloned());
        completed
    }

    /// Flushes held-back text when the transport closed without a terminal event.
    pub fn close(&mut self) -> Vec<String> {
        let completed = self.assembler.finish();
        self.words.extend(completed.iter().cloned());
        self.finished = true;
        completed
    }

    pub fn text(&self) -> String {
        self.words.concat()
    }

    /// An `error` event fails the request even though the transport succeeded.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(fragments: &[&str]) -> Vec<String> {
        let mut assembler = TokenAssembler::new();
        let mut tokens = Vec::new();
        for fragment in fragments {
            tokens.extend(assembler.push(fragment));
        }
        tokens.extend(assembler.finish());
        tokens
    }

    #[test]
    fn words_split_across_fragments_are_joined() {
        assert_eq!(feed(&["Hel", "lo wor", "ld"]), vec!["Hello", " ", "world"]);
    }

    #[test]
    fn trailing_word_is_held_back() {
        let mut assembler = TokenAssembler::new();
        assert_eq!(assembler.push("The qui"), vec!["The", " "]);
        assert_eq!(assembler.pending(), "qui");
        assert_eq!(assembler.push("ck "), vec!["quick", " "]);
        assert_eq!(assembler.pending(), "");
        assert!(assembler.finish().is_empty());
    }

    #[test]
    fn whitespace_runs_are_kept_as_tokens() {
        assert_eq!(
            feed(&["a \n\t", "b"]),
            vec!["a", " \n\t", "b"],
        );
    }

    #[test]
    fn every_split_reproduces_the_text() {
        let text = "Grüße aus Köln —  the pump's rated\tpressure is 20 bar.\n\nNext 段落 here ";
        let chars: Vec<char> = text.chars().collect();

        for first in 0..chars.len() {
            for second in first..chars.len() {
                let a: String = chars[..first].iter().collect();
                let b: String = chars[first..second].iter().collect();
                let c: String = chars[second..].iter().collect();
                let tokens = feed(&[&a, &b, &c]);
                assert_eq!(tokens.concat(), text);
                assert!(tokens.iter().all(|token| !token.is_empty()));
            }
        }
    }

    #[test]
    fn single_character_fragments_reproduce_the_text() {
        let text = "one  two\nthree";
        let pieces: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let tokens = feed(&refs);
        assert_eq!(tokens.concat(), text);
        assert!(tokens.contains(&"three".to_string()));
    }

    #[test]
    fn transcript_collects_sources_and_flushes_on_end() {
        let mut transcript = ChatTranscript::new();
        transcript.apply(StreamEvent::SourceReference {
            id: "a".to_string(),
            name: "a.pdf".to_string(),
            path: "a.pdf".to_string(),
        });
        transcript.apply(StreamEvent::content("Hi th"));
        let last = transcript.apply(StreamEvent::content("ere"));
        assert!(last.is_empty());

        assert_eq!(transcript.apply(StreamEvent::End), vec!["there"]);
        assert_eq!(transcript.text(), "Hi there");
        assert_eq!(transcript.sources.len(), 1);
        assert!(transcript.finished);
        assert!(!transcript.is_failed());
    }

    #[test]
    fn error_event_marks_the_transcript_failed() {
        let mut transcript = ChatTranscript::new();
        transcript.apply(StreamEvent::content("partial answ"));
        transcript.apply(StreamEvent::error("Internal Server Error"));

        assert!(transcript.is_failed());
        assert_eq!(transcript.text(), "partial answ");
        assert!(transcript.apply(StreamEvent::content("late")).is_empty());
    }
}
