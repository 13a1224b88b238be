//! docgrab-patch - prepares an extractor checkout for a remote browser.
//!
//! The extractor normally launches its own Chromium.  In a container setup
//! the browser runs as a separate service, so the extractor's `launch()`
//! routine is rewritten to resolve the browser host over DNS, ask its
//! DevTools endpoint for the WebSocket URL and `puppeteer.connect` to it.
//! The pinned package version is bumped alongside.

pub mod error;

pub use error::PatchError;

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use tracing::{info, warn};

/// Browser source file, relative to the extractor root.
pub const LAUNCH_SOURCE: &str = "src/utils/request/PuppeteerSg.js";

/// Package manifest, relative to the extractor root.
pub const MANIFEST: &str = "package.json";

/// Two-space-indented `async launch() {` up to the first line that is
/// exactly a two-space-indented `}`.
static LAUNCH_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^  async launch\(\) \{[\s\S]*?^  \}").expect("launch pattern is valid")
});

const HELPER_NAME: &str = "lookupIp";

/// What to point the extractor at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Hostname of the browser service (default: `browser`).
    pub host: String,
    /// DevTools port on that host (default: `9222`).
    pub port: u16,
    /// Version string to look for in the manifest.
    pub from_version: String,
    /// Version string that replaces it.
    pub to_version: String,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            host: "browser".to_owned(),
            port: 9222,
            from_version: "0.33.3".to_owned(),
            to_version: "0.33.5".to_owned(),
        }
    }
}

/// Result of touching one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Patched,
    AlreadyPatched,
    /// Nothing to replace; the file was left as is.
    Unchanged,
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileOutcome::Patched => "patched",
            FileOutcome::AlreadyPatched => "already patched",
            FileOutcome::Unchanged => "unchanged",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    pub launch: FileOutcome,
    pub manifest: FileOutcome,
}

/// Rewrite the `launch()` routine of `source`.
///
/// Returns `Ok(None)` when the helper is already present.
pub fn patch_launch(source: &str, opts: &PatchOptions) -> Result<Option<String>, PatchError> {
    if source.contains(&format!("async function {HELPER_NAME}(")) {
        return Ok(None);
    }
    check_host(&opts.host)?;
    if !LAUNCH_BLOCK.is_match(source) {
        return Err(PatchError::LaunchNotFound { path: LAUNCH_SOURCE.into() });
    }

    let launch = launch_routine(opts.port);
    let body = LAUNCH_BLOCK.replace_all(source, NoExpand(&launch));
    Ok(Some(format!("{}{}", header(&opts.host), body)))
}

/// Replace every occurrence of `from` with `to`; `None` if `from` is absent.
pub fn bump_version(manifest: &str, from: &str, to: &str) -> Option<String> {
    if from.is_empty() || !manifest.contains(from) {
        return None;
    }
    Some(manifest.replace(from, to))
}

/// Patch the extractor checkout at `root` in place.
///
/// Both files are read and the launch rewrite is validated before anything
/// is written, so a checkout without a `launch()` routine is left untouched.
pub fn patch_tree(root: &Path, opts: &PatchOptions) -> Result<PatchReport, PatchError> {
    let source_path = root.join(LAUNCH_SOURCE);
    let manifest_path = root.join(MANIFEST);

    let source = std::fs::read_to_string(&source_path).map_err(PatchError::io(&source_path))?;
    let manifest =
        std::fs::read_to_string(&manifest_path).map_err(PatchError::io(&manifest_path))?;

    let patched_source = patch_launch(&source, opts).map_err(|e| match e {
        PatchError::LaunchNotFound { .. } => PatchError::LaunchNotFound { path: source_path.clone() },
        other => other,
    })?;
    let bumped = bump_version(&manifest, &opts.from_version, &opts.to_version);

    let launch = match patched_source {
        Some(text) => {
            std::fs::write(&source_path, text).map_err(PatchError::io(&source_path))?;
            info!(path = %source_path.display(), host = %opts.host, port = opts.port, "launch routine rewritten");
            FileOutcome::Patched
        }
        None => {
            info!(path = %source_path.display(), "launch routine already patched");
            FileOutcome::AlreadyPatched
        }
    };

    let manifest = match bumped {
        Some(text) => {
            std::fs::write(&manifest_path, text).map_err(PatchError::io(&manifest_path))?;
            info!(
                path = %manifest_path.display(),
                from = %opts.from_version,
                to = %opts.to_version,
                "version bumped"
            );
            FileOutcome::Patched
        }
        None if manifest.contains(&opts.to_version) => FileOutcome::AlreadyPatched,
        None => {
            warn!(
                path = %manifest_path.display(),
                from = %opts.from_version,
                "version string not found; manifest left as is"
            );
            FileOutcome::Unchanged
        }
    };

    Ok(PatchReport { launch, manifest })
}

fn check_host(host: &str) -> Result<(), PatchError> {
    let ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok { Ok(()) } else { Err(PatchError::InvalidHost(host.to_owned())) }
}

fn header(host: &str) -> String {
    format!(
        "import axios from 'axios';
import dns from 'node:dns';

async function {HELPER_NAME}() {{
    return new Promise((resolve, reject) => {{
        dns.lookup('{host}', (err, address, family) => {{
            if(err) reject(err);
            resolve(address);
        }});
   }});
}};
"
    )
}

fn launch_routine(port: u16) -> String {
    format!(
        "  async launch() {{
    const ip_address = await {HELPER_NAME}();
    const response = await axios.get('http://' + ip_address + ':{port}/json/version');
    this.browser = await puppeteer.connect({{
        browserWSEndpoint: response.data.webSocketDebuggerUrl,
        defaultViewport: null,
    }});
  }}"
    )
}
