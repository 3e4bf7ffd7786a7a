use crate::config::LayerConfig;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, Response};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Cookie name prefix used by consent-gated file hosts to carry the
/// click-through confirmation token.
const CONFIRM_COOKIE_PREFIX: &str = "download_warning";

pub fn http_client() -> Result<Client> {
    Client::builder()
        .cookie_store(true)
        .build()
        .context("Failed to build HTTP client")
}

/// Download the archive bytes from `url`. Any network or HTTP error is
/// fatal: there is no retry, the whole pipeline aborts.
pub async fn fetch_archive(client: &Client, url: &str) -> Result<Vec<u8>> {
    info!("downloading archive from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {url}"))?
        .error_for_status()
        .context("Server returned error status")?;

    // Consent-gated hosts answer the first request with a warning page and
    // a confirmation cookie; reissue with the token as a query parameter.
    let response = match confirm_token(&response) {
        Some(token) => {
            info!("confirmation token found, reissuing download request");
            client
                .get(url)
                .query(&[("confirm", token.as_str())])
                .send()
                .await
                .with_context(|| format!("Failed confirmed request to {url}"))?
                .error_for_status()
                .context("Server returned error status on confirmed request")?
        }
        None => response,
    };

    let bytes = response.bytes().await.context("Failed to read archive body")?;
    info!("downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

fn confirm_token(response: &Response) -> Option<String> {
    response
        .cookies()
        .find(|cookie| cookie.name().starts_with(CONFIRM_COOKIE_PREFIX))
        .map(|cookie| cookie.value().to_string())
}

/// Unzip the archive into `dest`, preserving the bundle's internal layout.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to read ZIP archive")?;
    std::fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let outpath = match member.enclosed_name() {
            Some(path) => dest.join(path),
            None => continue,
        };

        if member.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut member, &mut outfile)?;
        }
    }

    info!("extracted {} archive member(s) to {:?}", archive.len(), dest);
    Ok(())
}

/// Locate the `.shp` component inside an extraction tree. The bundle layout
/// is not under our control and may nest files in subdirectories.
pub fn find_shapefile(root: &Path) -> Result<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| {
            e.path()
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"))
        })
        .map(|e| e.path().to_path_buf())
        .ok_or_else(|| anyhow!("no .shp member found under {:?}", root))
}

/// Resolve a layer to a local `.shp` path, downloading and extracting the
/// remote bundle when needed. Re-invocation is cheap: an extraction that
/// already yields a `.shp` is reused as-is.
pub async fn ensure_layer(
    client: &Client,
    layer: &LayerConfig,
    scratch_dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    if let Some(path) = &layer.path {
        if !path.exists() {
            bail!("shapefile for layer '{name}' not found at {:?}", path);
        }
        return Ok(path.clone());
    }

    let url = layer
        .url
        .as_ref()
        .ok_or_else(|| anyhow!("layer '{name}' has neither url nor path"))?;
    let dest = scratch_dir.join(name);

    if dest.exists() {
        if let Ok(shp) = find_shapefile(&dest) {
            info!("reusing extracted bundle at {:?}", shp);
            return Ok(shp);
        }
        warn!("scratch dir {:?} exists but holds no .shp, refetching", dest);
    }

    let bytes = fetch_archive(client, url).await?;
    extract_archive(&bytes, &dest)?;
    find_shapefile(&dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn bundle_with(members: &[&str]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for member in members {
            writer
                .start_file(*member, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"stub").unwrap();
        }
        writer.finish().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn finds_shp_in_nested_extraction_tree() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = bundle_with(&[
            "BR_Microrregioes_2022/BR_Microrregioes_2022.dbf",
            "BR_Microrregioes_2022/BR_Microrregioes_2022.shp",
            "BR_Microrregioes_2022/BR_Microrregioes_2022.prj",
        ]);
        extract_archive(&bytes, dir.path()).unwrap();

        let shp = find_shapefile(dir.path()).unwrap();
        assert!(shp.ends_with("BR_Microrregioes_2022/BR_Microrregioes_2022.shp"));
    }

    #[test]
    fn missing_shp_member_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = bundle_with(&["readme.txt"]);
        extract_archive(&bytes, dir.path()).unwrap();

        let err = find_shapefile(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no .shp member"));
    }

    #[test]
    fn extraction_preserves_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = bundle_with(&["a/b/c.shp"]);
        extract_archive(&bytes, dir.path()).unwrap();
        assert!(dir.path().join("a/b/c.shp").is_file());
    }
}
