//! Temporary Python projects for tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project directory, removed on drop.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::python_project();
/// assert!(fixture.path().join("pkg/core.py").exists());
/// ```
pub struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    /// Create an empty project.
    ///
    /// # Panics
    ///
    /// Panics if temporary directory creation fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a small project with annotated, partially annotated, and
    /// unannotated modules plus directories that scans must skip.
    ///
    /// # Panics
    ///
    /// Panics if file creation fails.
    #[must_use]
    pub fn python_project() -> Self {
        let fixture = Self::new();
        fixture.write_file("main.py", Self::untyped_module());
        fixture.write_file("pkg/__init__.py", "");
        fixture.write_file("pkg/core.py", Self::typed_module());
        fixture.write_file(
            "pkg/util.py",
            "def helper(x: int, y):\n    return x + y\n\ndef done() -> None:\n    pass\n",
        );
        fixture.write_file("pkg/__pycache__/core.cpython-312.py", "x = 1\n");
        fixture.write_file(".venv/lib/site.py", "def skipped(a):\n    pass\n");
        fixture.write_file("node_modules/pkg/setup.py", "def skipped(a):\n    pass\n");
        fixture.write_file("README.md", "# demo\n");
        fixture
    }

    /// Module with no annotations at all.
    #[must_use]
    pub fn untyped_module() -> &'static str {
        "import os\n\nCOUNT = 0\n\ndef add(a, b):\n    return a + b\n\n\
         class Greeter:\n    def greet(self, name):\n        return 'hi ' + name\n"
    }

    /// Module that is fully annotated.
    #[must_use]
    pub fn typed_module() -> &'static str {
        "LIMIT: int = 10\n\ndef scale(x: float, factor: float = 2.0) -> float:\n    return x * factor\n"
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the root, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
        path
    }

    /// Read a file relative to the root.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    #[must_use]
    pub fn read_file(&self, relative: &str) -> String {
        std::fs::read_to_string(self.temp_dir.path().join(relative))
            .expect("Failed to read fixture file")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_project_layout() {
        let fixture = TestFixture::python_project();
        assert!(fixture.path().join("main.py").exists());
        assert!(fixture.path().join("pkg/core.py").exists());
        assert!(fixture.path().join(".venv/lib/site.py").exists());
        assert_eq!(fixture.read_file("pkg/core.py"), TestFixture::typed_module());
    }

    #[test]
    fn test_write_file_creates_parents() {
        let fixture = TestFixture::new();
        let path = fixture.write_file("a/b/c.py", "x = 1\n");
        assert!(path.exists());
    }
}
