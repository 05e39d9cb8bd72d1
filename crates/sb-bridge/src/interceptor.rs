use crate::directives;

/// Sent to the process in place of a directive line whose characters were
/// already forwarded for echo, so the shell discards them.
pub const DISCARD_LINE: &str = "\x15";

/// What to do with one piece of intercepted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptAction {
    /// Write these bytes to the control session's process.
    Forward(String),
    /// A complete directive line. Its terminator never reaches the process.
    Directive(String),
}

/// Line buffer for one connection's control-session keystrokes.
///
/// Characters are forwarded as they arrive so the terminal echoes them.
/// When a terminator arrives the buffered line is classified: ordinary lines
/// pass through with their terminator, directive lines are swallowed.
#[derive(Debug, Default, Clone)]
pub struct Interceptor {
    buffer: String,
    /// Part of the current line has already been forwarded.
    echoed: bool,
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line collected so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Split `chunk` into forwarded input and completed directives. Backspace
    /// pops the buffer and is still forwarded so the shell's echo stays in step.
    pub fn feed(&mut self, chunk: &str) -> Vec<InterceptAction> {
        let mut actions = Vec::new();
        let mut segment_start = 0;
        let mut chars = chunk.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '\r' | '\n' => {
                    let mut end = i + 1;
                    if c == '\r' {
                        if let Some(&(j, '\n')) = chars.peek() {
                            chars.next();
                            end = j + 1;
                        }
                    }
                    let line = std::mem::take(&mut self.buffer);
                    let echoed = std::mem::replace(&mut self.echoed, false);
                    if directives::is_directive(&line) {
                        if echoed {
                            actions.push(InterceptAction::Forward(DISCARD_LINE.to_string()));
                        }
                        actions.push(InterceptAction::Directive(line.trim().to_string()));
                    } else {
                        actions.push(InterceptAction::Forward(
                            chunk[segment_start..end].to_string(),
                        ));
                    }
                    segment_start = end;
                }
                '\x7f' | '\x08' => {
                    self.buffer.pop();
                }
                // Ctrl-C and Ctrl-U abandon the line in the shell too.
                '\x03' | '\x15' => self.buffer.clear(),
                _ => self.buffer.push(c),
            }
        }

        let rest = &chunk[segment_start..];
        if !rest.is_empty() {
            actions.push(InterceptAction::Forward(rest.to_string()));
            self.echoed = true;
        }
        actions
    }
}
