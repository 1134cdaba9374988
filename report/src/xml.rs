//! JUnit-style XML report sink.
//!
//! The document is streamed: [`XmlReport::create`] writes the declaration and
//! the opening `testsuite` element, every [`XmlReport::add_case`] appends one
//! `testcase`, and [`XmlReport::finish`] closes the suite. `finish` consumes
//! the report so it can only run once.
//!
//! ```xml
//! <?xml version='1.0' encoding='UTF-8'?>
//! <testsuite name='ptest' tests='2'>
//!     <testcase classname='/usr/lib/zlib/ptest' name='run-ptest'>
//!         <duration>3</duration>
//!     </testcase>
//!     <testcase classname='/usr/lib/bash/ptest' name='run-ptest'>
//!         <duration>300</duration>
//!         <failure type='exit_code' message='run-ptest exited from signal SIGKILL (9)'></failure>
//!         <failure type='timeout'/>
//!     </testcase>
//! </testsuite>
//! ```

use crate::outcome::ExecutionResult;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::error;

/// Value of the `testsuite` element's `name` attribute
pub const SUITE_NAME: &str = "ptest";
/// Value of every `testcase` element's `name` attribute
pub const CASE_NAME: &str = "run-ptest";

/// Errors raised while writing a report
#[derive(Error, Debug)]
pub enum ReportError {
    /// The destination could not be opened for writing
    #[error("Failed to open report '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Append-only XML report
#[derive(Debug)]
pub struct XmlReport<W: Write> {
    writer: W,
    cases: usize,
}

impl XmlReport<BufWriter<File>> {
    /// Open `destination` and write the document prologue.
    pub fn create(expected: usize, destination: &Path) -> ReportResult<Self> {
        let file = File::create(destination).map_err(|source| {
            error!("Could not open {}: {}", destination.display(), source);
            ReportError::Open {
                path: destination.to_path_buf(),
                source,
            }
        })?;
        Self::from_writer(expected, BufWriter::new(file))
    }
}

impl<W: Write> XmlReport<W> {
    /// Start a report on an arbitrary writer.
    pub fn from_writer(expected: usize, mut writer: W) -> ReportResult<Self> {
        writeln!(writer, "<?xml version='1.0' encoding='UTF-8'?>")?;
        writeln!(
            writer,
            "<testsuite name='{}' tests='{}'>",
            SUITE_NAME, expected
        )?;
        Ok(Self { writer, cases: 0 })
    }

    /// Append one `testcase` record.
    pub fn add_case(&mut self, classname: &str, result: &ExecutionResult) -> ReportResult<()> {
        let w = &mut self.writer;
        writeln!(
            w,
            "\t<testcase classname='{}' name='{}'>",
            escape(classname),
            CASE_NAME
        )?;
        writeln!(w, "\t\t<duration>{}</duration>", result.duration_secs())?;
        if !result.exit.is_success() {
            let message = format!("{} {}", CASE_NAME, result.exit);
            writeln!(
                w,
                "\t\t<failure type='exit_code' message='{}'></failure>",
                escape(&message)
            )?;
        }
        if result.timed_out {
            writeln!(w, "\t\t<failure type='timeout'/>")?;
        }
        writeln!(w, "\t</testcase>")?;
        self.cases += 1;
        Ok(())
    }

    /// Number of `testcase` records written so far.
    pub fn cases(&self) -> usize {
        self.cases
    }

    /// Close the suite and flush, handing back the writer.
    pub fn finish(mut self) -> ReportResult<W> {
        writeln!(self.writer, "</testsuite>")?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Escape an attribute value. Control characters XML 1.0 cannot carry at all
/// become U+FFFD; tab and newlines are kept as character references so
/// attribute normalisation does not fold them into spaces.
fn escape(raw: &str) -> Cow<'_, str> {
    let needs_escape =
        |c: char| matches!(c, '&' | '<' | '>' | '\'' | '"' | '\t' | '\n' | '\r') || is_forbidden(c);
    if !raw.chars().any(needs_escape) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            '\t' => escaped.push_str("&#9;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            c if is_forbidden(c) => escaped.push(char::REPLACEMENT_CHARACTER),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Characters outside the XML 1.0 `Char` production, even as references.
fn is_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ExitClassification;
    use std::time::Duration;

    fn passed(secs: u64) -> ExecutionResult {
        ExecutionResult::new(
            ExitClassification::Exited(0),
            Duration::from_secs(secs),
            false,
        )
    }

    fn render(cases: &[(&str, ExecutionResult)]) -> String {
        let mut report = XmlReport::from_writer(cases.len(), Vec::new()).unwrap();
        for (classname, result) in cases {
            report.add_case(classname, result).unwrap();
        }
        String::from_utf8(report.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_report() {
        let xml = render(&[]);
        assert_eq!(
            xml,
            "<?xml version='1.0' encoding='UTF-8'?>\n<testsuite name='ptest' tests='0'>\n</testsuite>\n"
        );
    }

    #[test]
    fn test_passing_case_has_no_failure() {
        let xml = render(&[("/usr/lib/zlib/ptest", passed(2))]);
        assert!(xml.contains("<testcase classname='/usr/lib/zlib/ptest' name='run-ptest'>"));
        assert!(xml.contains("<duration>2</duration>"));
        assert!(!xml.contains("<failure"));
    }

    #[test]
    fn test_exit_code_failure() {
        let failed = ExecutionResult::new(ExitClassification::Exited(3), Duration::ZERO, false);
        let xml = render(&[("/usr/lib/gdb/ptest", failed)]);
        assert!(xml.contains(
            "<failure type='exit_code' message='run-ptest exited with code: 3'></failure>"
        ));
        assert!(!xml.contains("type='timeout'"));
    }

    #[test]
    fn test_timeout_failure_adds_second_element() {
        let killed = ExecutionResult::new(
            ExitClassification::Signaled {
                number: 9,
                name: "SIGKILL".to_string(),
            },
            Duration::from_secs(5),
            true,
        );
        let xml = render(&[("/usr/lib/bash/ptest", killed)]);
        assert!(xml.contains("message='run-ptest exited from signal SIGKILL (9)'"));
        assert!(xml.contains("<failure type='timeout'/>"));
    }

    #[test]
    fn test_case_count_and_single_closing_tag() {
        let cases: Vec<(&str, ExecutionResult)> = (0..4).map(|_| ("/p/ptest", passed(0))).collect();
        let xml = render(&cases);
        assert_eq!(xml.matches("<testcase ").count(), 4);
        assert_eq!(xml.matches("</testcase>").count(), 4);
        assert_eq!(xml.matches("</testsuite>").count(), 1);
        assert!(xml.ends_with("</testsuite>\n"));
        assert!(xml.contains("tests='4'"));
    }

    #[test]
    fn test_attribute_escaping() {
        let xml = render(&[("/opt/r&d/<it's>/ptest", passed(0))]);
        assert!(xml.contains("classname='/opt/r&amp;d/&lt;it&apos;s&gt;/ptest'"));
    }

    #[test]
    fn test_control_characters_never_reach_the_document() {
        let xml = render(&[("/usr/lib/od\u{1}d\u{1b}[0m/ptest", passed(0))]);
        assert!(xml.contains("classname='/usr/lib/od\u{fffd}d\u{fffd}[0m/ptest'"));
        assert!(!xml.chars().any(is_forbidden));

        let xml = render(&[("/usr/lib/tab\there\nline/ptest", passed(0))]);
        assert!(xml.contains("classname='/usr/lib/tab&#9;here&#10;line/ptest'"));
    }

    #[test]
    fn test_plain_values_are_borrowed() {
        assert!(matches!(escape("/usr/lib/zlib/ptest"), Cow::Borrowed(_)));
        assert!(matches!(escape("/usr/lib/z\u{7f}lib/ptest"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.xml");
        let mut report = XmlReport::create(1, &path).unwrap();
        report.add_case("/usr/lib/acl/ptest", &passed(1)).unwrap();
        assert_eq!(report.cases(), 1);
        report.finish().unwrap();

        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.starts_with("<?xml version='1.0' encoding='UTF-8'?>\n"));
        assert!(xml.ends_with("</testsuite>\n"));
    }

    #[test]
    fn test_create_unwritable_destination() {
        let result = XmlReport::create(1, Path::new("/nonexistent/dir/results.xml"));
        assert!(matches!(result, Err(ReportError::Open { .. })));
    }
}
