//! Live preview surface for code extracted from replies.
//!
//! The surface is a host HTML document holding one sandboxed iframe whose
//! `srcdoc` is the code. The sandbox grants script execution and modal
//! dialogs only: no same-origin access, no top-level navigation, no forms,
//! no popups.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const HOST_FILE: &str = "preview.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Scripts,
    Modals,
}

impl Capability {
    fn token(&self) -> &'static str {
        match self {
            Capability::Scripts => "allow-scripts",
            Capability::Modals => "allow-modals",
        }
    }
}

/// The full set of capabilities a preview ever gets.
pub const PREVIEW_CAPABILITIES: [Capability; 2] = [Capability::Scripts, Capability::Modals];

pub fn sandbox_attribute(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(Capability::token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Host document embedding `code` in a sandboxed frame.
pub fn host_document(code: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>Live Preview</title>\n\
         <style>html,body{{margin:0;height:100%;}}iframe{{border:0;width:100%;height:100%;}}</style>\n\
         </head>\n\
         <body>\n\
         <iframe sandbox=\"{}\" srcdoc=\"{}\"></iframe>\n\
         </body>\n\
         </html>\n",
        sandbox_attribute(&PREVIEW_CAPABILITIES),
        escape_html(code)
    )
}

#[derive(Debug)]
pub struct PreviewSurface {
    document: String,
    collapsed: bool,
    host_dir: Option<PathBuf>,
}

impl PreviewSurface {
    /// Starts collapsed and empty. Without a host directory the surface only
    /// lives in the terminal pane.
    pub fn new(host_dir: Option<PathBuf>) -> Self {
        Self {
            document: String::new(),
            collapsed: true,
            host_dir,
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn host_path(&self) -> Option<PathBuf> {
        self.host_dir.as_deref().map(|dir| dir.join(HOST_FILE))
    }

    /// Replaces the document and reveals the pane.
    pub fn load(&mut self, code: &str) -> Result<()> {
        self.document = code.to_string();
        self.collapsed = false;
        tracing::info!(bytes = code.len(), "preview loaded");
        self.write_host()
    }

    /// Empties the surface without closing it.
    pub fn clear(&mut self) -> Result<()> {
        self.load("")
    }

    pub fn toggle_minimized(&mut self) {
        self.collapsed = !self.collapsed;
    }

    pub fn open_in_browser(&self) -> Result<()> {
        let path = self
            .host_path()
            .context("no preview directory configured")?;
        if !path.exists() {
            self.write_host()?;
        }
        open::that(&path).with_context(|| format!("opening {}", path.display()))?;
        Ok(())
    }

    fn write_host(&self) -> Result<()> {
        let Some(dir) = self.host_dir.as_deref() else {
            return Ok(());
        };
        write_host_document(dir, &self.document)
    }
}

fn write_host_document(dir: &Path, code: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(HOST_FILE);
    fs::write(&path, host_document(code)).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sandbox_grants_only_scripts_and_modals() {
        let html = host_document("<p>x</p>");
        assert!(html.contains("sandbox=\"allow-scripts allow-modals\""));
        assert!(!html.contains("allow-same-origin"));
        assert!(!html.contains("allow-top-navigation"));
    }

    #[test]
    fn srcdoc_is_attribute_escaped() {
        let html = host_document("<a href=\"#\">&</a>");
        assert!(html.contains("srcdoc=\"&lt;a href=&quot;#&quot;&gt;&amp;&lt;/a&gt;\""));
    }

    #[test]
    fn load_reveals_and_writes_the_host_document() {
        let dir = TempDir::new().unwrap();
        let mut preview = PreviewSurface::new(Some(dir.path().to_path_buf()));
        assert!(preview.is_collapsed());

        preview.load("<h1>Hi</h1>").unwrap();
        assert!(!preview.is_collapsed());
        assert_eq!(preview.document(), "<h1>Hi</h1>");

        let written = fs::read_to_string(preview.host_path().unwrap()).unwrap();
        assert!(written.contains("&lt;h1&gt;Hi&lt;/h1&gt;"));
    }

    #[test]
    fn clearing_twice_leaves_it_empty_and_open() {
        let dir = TempDir::new().unwrap();
        let mut preview = PreviewSurface::new(Some(dir.path().to_path_buf()));
        preview.load("<p>x</p>").unwrap();

        preview.clear().unwrap();
        assert_eq!(preview.document(), "");
        preview.clear().unwrap();
        assert_eq!(preview.document(), "");
        assert!(!preview.is_collapsed());
    }

    #[test]
    fn minimize_keeps_content() {
        let mut preview = PreviewSurface::new(None);
        preview.load("x").unwrap();
        preview.toggle_minimized();
        assert!(preview.is_collapsed());
        assert_eq!(preview.document(), "x");
        preview.toggle_minimized();
        assert!(!preview.is_collapsed());
    }
}
