//! Caller attribution through wrapper layers.
//!
//! A log call made from inside an adapter would normally report the adapter's
//! own source location. [`CallerResolver`] walks the live stack instead and
//! reports the first frame outside a set of excluded paths.

use std::fmt;
use std::panic::Location;
use std::path::{Component, Path};

/// Maximum number of frames inspected by [`CallerResolver::resolve`].
pub const MAX_DEPTH: usize = 32;

/// Paths belonging to the toolchain and the stack walker itself.
const TOOLCHAIN_PATHS: &[&str] = &[
    "/rustc/",
    "\\rustc\\",
    "/library/std/",
    "/library/core/",
    "/library/alloc/",
    "/library/test/",
    "\\library\\std\\",
    "\\library\\core\\",
    "\\library\\alloc\\",
    "\\library\\test\\",
    "backtrace-0.",
];

/// A source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub file: String,
    pub line: u32,
}

impl Caller {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// `dir/file.rs:line`, keeping only the last directory of the path.
    pub fn short(&self) -> String {
        let trimmed = match self.file.rfind(['/', '\\']) {
            Some(last) => match self.file[..last].rfind(['/', '\\']) {
                Some(prev) => &self.file[prev + 1..],
                None => &self.file,
            },
            None => &self.file,
        };
        format!("{}:{}", trimmed, self.line)
    }
}

impl From<&Location<'_>> for Caller {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Finds the first stack frame outside a set of excluded paths.
///
/// Frames are skipped when their file contains any excluded substring, when
/// they belong to a test file (a `tests` directory or a `tests.rs` module),
/// when they come from the toolchain, or when they have no resolvable
/// location. At most `max_depth` frames are inspected; if none qualifies the
/// caller-supplied fallback is returned.
#[derive(Debug, Clone)]
pub struct CallerResolver {
    excluded: Vec<String>,
    skip: usize,
    max_depth: usize,
}

impl CallerResolver {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
            skip: 0,
            max_depth: MAX_DEPTH,
        }
    }

    /// Number of innermost frames to ignore before inspecting any.
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.excluded.push(path.into());
        self
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Walks the current thread's stack. Frames inside the resolver itself
    /// are always skipped.
    pub fn resolve(&self, fallback: Caller) -> Caller {
        let limit = self.skip + self.max_depth;
        let mut raw = Vec::with_capacity(limit);
        backtrace::trace(|frame| {
            raw.push(frame.clone());
            raw.len() < limit
        });

        let mut frames = Vec::with_capacity(self.max_depth);
        for frame in raw.iter().skip(self.skip) {
            let mut resolved = false;
            // Inlined functions show up as several symbols of one frame.
            backtrace::resolve_frame(frame, |symbol| {
                resolved = true;
                match (symbol.filename(), symbol.lineno()) {
                    // The resolver's own frames are never the caller.
                    (Some(file), Some(_)) if file.ends_with(file!()) => {}
                    (Some(file), Some(line)) => {
                        frames.push(Some(Caller::new(file.display().to_string(), line)))
                    }
                    _ => frames.push(None),
                }
            });
            if !resolved {
                frames.push(None);
            }
        }

        self.resolve_from(frames, fallback)
    }

    /// Applies the resolution policy to an explicit list of frames,
    /// innermost first. `None` stands for a frame without a location.
    pub fn resolve_from<I>(&self, frames: I, fallback: Caller) -> Caller
    where
        I: IntoIterator<Item = Option<Caller>>,
    {
        frames
            .into_iter()
            .take(self.max_depth)
            .flatten()
            .find(|caller| self.qualifies(&caller.file))
            .unwrap_or(fallback)
    }

    fn qualifies(&self, file: &str) -> bool {
        !TOOLCHAIN_PATHS.iter().any(|p| file.contains(p))
            && !self.excluded.iter().any(|p| file.contains(p.as_str()))
            && !is_test_file(file)
    }
}

fn is_test_file(file: &str) -> bool {
    let path = Path::new(file);
    path.file_name().is_some_and(|name| name == "tests.rs")
        || path
            .components()
            .any(|c| matches!(c, Component::Normal(name) if name == "tests"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: &str, line: u32) -> Option<Caller> {
        Some(Caller::new(file, line))
    }

    fn fallback() -> Caller {
        Caller::new("fallback.rs", 1)
    }

    #[test]
    fn test_skips_excluded_frames() {
        let resolver = CallerResolver::new(["ember-fnd/src/logger", "sqlx-core-"]);
        let frames = vec![
            frame("/src/ember-fnd/src/logger/query.rs", 120),
            frame("/cargo/registry/src/sqlx-core-0.8.0/src/executor.rs", 77),
            frame("/app/src/repo/user.rs", 42),
            frame("/app/src/main.rs", 10),
        ];

        assert_eq!(
            resolver.resolve_from(frames, fallback()),
            Caller::new("/app/src/repo/user.rs", 42)
        );
    }

    #[test]
    fn test_skips_unresolved_test_and_toolchain_frames() {
        let resolver = CallerResolver::new(Vec::<String>::new());
        let frames = vec![
            None,
            frame("/rustc/abc123/library/core/src/ops/function.rs", 250),
            frame("/app/tests/user_tests.rs", 8),
            frame("/app/src/repo/tests.rs", 9),
            frame("/app/src/repo/order.rs", 31),
        ];

        assert_eq!(
            resolver.resolve_from(frames, fallback()),
            Caller::new("/app/src/repo/order.rs", 31)
        );
    }

    #[test]
    fn test_falls_back_when_window_exhausted() {
        let resolver = CallerResolver::new(["wrapper"]).with_max_depth(2);
        let frames = vec![
            frame("/app/wrapper/a.rs", 1),
            frame("/app/wrapper/b.rs", 2),
            frame("/app/src/outside_window.rs", 3),
        ];

        assert_eq!(resolver.resolve_from(frames, fallback()), fallback());
        assert_eq!(resolver.resolve_from(Vec::new(), fallback()), fallback());
    }

    #[test]
    fn test_live_stack_inside_resolver_file_falls_back() {
        // Only this file and the test harness are on the first frames.
        let resolver = CallerResolver::new(["not_on_this_stack"]).with_max_depth(8);
        assert_eq!(resolver.resolve(fallback()), fallback());
    }

    #[test]
    fn test_short_caller() {
        assert_eq!(
            Caller::new("/app/src/repo/user.rs", 42).short(),
            "repo/user.rs:42"
        );
        assert_eq!(Caller::new("repo\\user.rs", 7).short(), "repo\\user.rs:7");
        assert_eq!(Caller::new("main.rs", 3).short(), "main.rs:3");
    }

    #[test]
    fn test_from_location() {
        let caller = Caller::from(Location::caller());
        assert!(caller.file.ends_with("caller.rs"));
        assert!(caller.line > 0);
    }
}
