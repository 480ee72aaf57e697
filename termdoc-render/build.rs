use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use ureq::AgentBuilder;
use walkdir::WalkDir;
use zip::read::ZipArchive;

const DEFAULT_PDFIUM_VERSION: &str = "7350";
const DEFAULT_BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    for var in [
        "TERMDOC_PDFIUM_SKIP_DOWNLOAD",
        "TERMDOC_PDFIUM_ARCHIVE_PATH",
        "TERMDOC_PDFIUM_VERSION",
        "TERMDOC_PDFIUM_PLATFORM",
        "TERMDOC_PDFIUM_BASE_URL",
        "PDFIUM_DYNAMIC_LIB_PATH",
        "PDFIUM_STATIC_LIB_PATH",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    if env::var_os("TERMDOC_PDFIUM_SKIP_DOWNLOAD").is_some() {
        return Ok(());
    }
    if env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        // User-provided library locations take precedence.
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR env var not set")?);
    let staging_dir = out_dir.join("pdfium");
    fs::create_dir_all(&staging_dir).context("failed to create staging directory")?;

    let target_os =
        env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS env var missing")?;
    let target_arch =
        env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH env var missing")?;
    let platform = env::var("TERMDOC_PDFIUM_PLATFORM")
        .unwrap_or_else(|_| default_platform(&target_os, &target_arch));

    if let Ok(path) = locate_library(&staging_dir, &target_os) {
        write_rustc_env(&path)?;
        return Ok(());
    }

    let archive_path = if let Some(path) = env::var_os("TERMDOC_PDFIUM_ARCHIVE_PATH") {
        PathBuf::from(path)
    } else {
        match download_pdfium(&staging_dir, &platform) {
            Ok(path) => path,
            Err(err) => {
                // Build without the hint; the loader falls back to the
                // current directory and the system library at runtime.
                println!("cargo:warning=pdfium download skipped: {err}");
                return Ok(());
            }
        }
    };

    extract_archive(&archive_path, &staging_dir)?;

    let library_path = locate_library(&staging_dir, &target_os).with_context(|| {
        format!(
            "pdfium library not found in {:?} after extraction",
            staging_dir
        )
    })?;

    write_rustc_env(&library_path)
}

fn write_rustc_env(path: &Path) -> Result<()> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("failed to convert library path {:?} to UTF-8", path))?;
    println!("cargo:rustc-env=TERMDOC_PDFIUM_LIBRARY_PATH={}", path_str);
    Ok(())
}

fn default_platform(target_os: &str, target_arch: &str) -> String {
    match (target_os, target_arch) {
        ("macos", "aarch64") => "mac-arm64".to_string(),
        ("macos", "x86_64") => "mac-x64".to_string(),
        ("linux", "aarch64") => "linux-arm64".to_string(),
        ("linux", "arm") => "linux-arm".to_string(),
        ("linux", "x86_64") => "linux-x64".to_string(),
        ("windows", "aarch64") => "windows-arm64".to_string(),
        ("windows", "x86_64") => "windows-x64".to_string(),
        ("windows", "x86") => "windows-x86".to_string(),
        (other_os, other_arch) => format!("{}-{}", other_os, other_arch),
    }
}

fn library_filenames(target_os: &str) -> &'static [&'static str] {
    match target_os {
        "windows" => &["pdfium.dll"],
        "macos" => &["libpdfium.dylib"],
        _ => &["libpdfium.so"],
    }
}

fn locate_library(root: &Path, target_os: &str) -> Result<PathBuf> {
    let candidates = library_filenames(target_os);
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.metadata().map(|m| m.is_file()).unwrap_or(false) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if candidates.iter().any(|c| *c == file_name.as_ref()) {
            return Ok(entry.into_path());
        }
    }
    Err(anyhow!("pdfium library not found for target {target_os}"))
}

fn download_pdfium(staging_dir: &Path, platform: &str) -> Result<PathBuf> {
    let version =
        env::var("TERMDOC_PDFIUM_VERSION").unwrap_or_else(|_| DEFAULT_PDFIUM_VERSION.to_string());
    let base_url =
        env::var("TERMDOC_PDFIUM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let release_tag = format!("chromium/{version}");

    let download_dir = staging_dir.join("downloads");
    fs::create_dir_all(&download_dir).context("failed to create download cache directory")?;

    let candidates = [
        format!("pdfium-{platform}.tgz"),
        format!("pdfium-{version}-{platform}.tgz"),
        format!("pdfium-{platform}.zip"),
        format!("pdfium-{version}-{platform}.zip"),
    ];
    let mut last_error = None;

    for filename in candidates {
        let archive_path = download_dir.join(&filename);
        if archive_path.exists() {
            return Ok(archive_path);
        }

        let url = format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            release_tag,
            filename
        );
        match try_download(&url, &archive_path) {
            Ok(()) => return Ok(archive_path),
            Err(err) => last_error = Some(err),
        }
    }

    Err(anyhow!(
        "failed to download pdfium for platform {platform} (version {version}); last error: {}",
        last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no candidates succeeded".to_string())
    ))
}

fn try_download(url: &str, destination: &Path) -> Result<()> {
    let agent = AgentBuilder::new()
        .timeout_read(Duration::from_secs(120))
        .timeout_write(Duration::from_secs(120))
        .build();

    let response = agent
        .get(url)
        .call()
        .map_err(|err| anyhow!("GET {} failed: {}", url, err))?;

    let mut reader = response.into_reader();
    let mut file =
        File::create(destination).with_context(|| format!("failed to create {:?}", destination))?;
    io::copy(&mut reader, &mut file)
        .with_context(|| format!("failed to write downloaded data to {:?}", destination))?;
    Ok(())
}

fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    let extension = archive
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if extension == "tgz" || extension == "gz" {
        let file =
            File::open(archive).with_context(|| format!("failed to open archive {:?}", archive))?;
        let mut tar = Archive::new(GzDecoder::new(file));
        tar.unpack(destination)
            .with_context(|| format!("failed to unpack {:?}", archive))?;
    } else if extension == "zip" {
        let file =
            File::open(archive).with_context(|| format!("failed to open archive {:?}", archive))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("failed to read zip archive {:?}", archive))?;
        zip.extract(destination)
            .with_context(|| format!("failed to extract {:?}", archive))?;
    } else {
        return Err(anyhow!("unsupported archive format for {:?}", archive));
    }

    Ok(())
}
