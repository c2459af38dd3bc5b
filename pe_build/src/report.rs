use std::{fs, path::Path};

use pe_image_name::ImageName;
use serde::Serialize;

use crate::{config::BuildConfig, sequencer::Published, Result};

#[derive(Debug, Serialize)]
struct Report<'a> {
    pe_version: &'a str,
    tag: &'a str,
    images: Vec<ReportImage<'a>>,
}

#[derive(Debug, Serialize)]
struct ReportImage<'a> {
    variant: &'static str,
    image: &'a ImageName,
    image_id: &'a str,
}

/// Writes a JSON summary of the published images to `path`.
pub fn write(path: &Path, config: &BuildConfig, published: &[Published]) -> Result<()> {
    let report = Report {
        pe_version: &config.pe_version,
        tag: &config.tag_version,
        images: published
            .iter()
            .map(|p| ReportImage {
                variant: p.variant.as_str(),
                image: &p.image,
                image_id: &p.image_id,
            })
            .collect(),
    };
    let mut json = serde_json::to_string_pretty(&report)?;
    json.push('\n');
    fs::write(path, json).map_err(|error| format!("failed to write report to {path:?}: {error}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::*;
    use crate::{cli::Cli, config::Variant};

    #[test]
    fn writes_published_images() {
        let cli = Cli::try_parse_from(["pe-build", "--pe-version", "2018.1.0", "--tag-version", "3"])
            .unwrap();
        let config = BuildConfig::resolve(cli.args).unwrap();
        let published = [Published {
            variant: Variant::LowMem,
            image: "pe_master_public_lowmem_r10k:2018.1.0-3".parse().unwrap(),
            image_id: "sha256:0123".to_owned(),
        }];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write(&path, &config, &published).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "pe_version": "2018.1.0",
                "tag": "3",
                "images": [{
                    "variant": "lowmem",
                    "image": "pe_master_public_lowmem_r10k:2018.1.0-3",
                    "image_id": "sha256:0123",
                }],
            })
        );
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let cli = Cli::try_parse_from(["pe-build", "--pe-version", "2018.1.0", "--tag-version", "3"])
            .unwrap();
        let config = BuildConfig::resolve(cli.args).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let error = write(&dir.path().join("missing/report.json"), &config, &[]).unwrap_err();
        assert!(error.to_string().contains("failed to write report"));
    }
}
