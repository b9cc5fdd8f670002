use std::io::{self, Write};

const GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

/// Rotating spinner glyph.
#[derive(Debug, Default, Clone)]
pub struct Spinner {
    step: usize,
}

impl Spinner {
    pub fn next_glyph(&mut self) -> char {
        let g = GLYPHS[self.step];
        self.step = (self.step + 1) % GLYPHS.len();
        g
    }
}

/// Single status line, redrawn in place with `\r`.
pub struct Progress {
    spinner: Spinner,
    separator: &'static str,
    out: Box<dyn Write>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Progress {
    pub fn stdout() -> Self {
        Self::to_writer(Box::new(io::stdout()))
    }

    pub fn stderr() -> Self {
        Self::to_writer(Box::new(io::stderr()))
    }

    pub fn to_writer(out: Box<dyn Write>) -> Self {
        Self {
            spinner: Spinner::default(),
            separator: " \t",
            out,
        }
    }

    /// Text between the status line and the spinner glyph.
    pub fn with_separator(mut self, separator: &'static str) -> Self {
        self.separator = separator;
        self
    }

    pub fn redraw(&mut self, line: &str) {
        let glyph = self.spinner.next_glyph();
        // a closed output is not worth aborting a measurement for
        let _ = write!(self.out, "\r{line}{}{glyph}", self.separator);
        let _ = self.out.flush();
    }
}
