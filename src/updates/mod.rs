//! Update package descriptor and `update.xml` generation.

use crate::fsutil::{digest_file, write_atomic};
use anyhow::{bail, Result};
use sha2::Sha512;
use std::path::Path;

pub const UPDATE_MANIFEST: &str = "update.xml";

/// Names and URL of one published update, all derived from the build id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub version: String,
    pub build_id: String,
    pub url: String,
    pub package_name: String,
    pub manifest_name: String,
    pub metadata_name: String,
}

impl UpdateDescriptor {
    pub fn derive(version: &str, build_id: &str, base_url: &str) -> Result<Self> {
        if build_id.is_empty() || !build_id.chars().all(|c| c.is_ascii_digit()) {
            bail!("build id '{build_id}' is not numeric");
        }
        let package_name = format!("update_{build_id}.mar");
        Ok(Self {
            version: version.to_string(),
            build_id: build_id.to_string(),
            url: format!("{base_url}{package_name}"),
            manifest_name: format!("update_{build_id}.xml"),
            metadata_name: format!("application_{build_id}.ini"),
            package_name,
        })
    }

    /// The update manifest for a package of `size` bytes with SHA-512 `hash`.
    pub fn render_manifest(&self, size: u64, hash: &str) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\"?>\n",
                "<updates>\n",
                "  <update type=\"minor\" appVersion=\"{version}\" version=\"{version}\" ",
                "extensionVersion=\"{version}\" buildID=\"{build_id}\">\n",
                "    <patch type=\"complete\" URL=\"{url}\" hashFunction=\"SHA512\" ",
                "hashValue=\"{hash}\" size=\"{size}\"/>\n",
                "  </update>\n",
                "</updates>\n"
            ),
            version = xml_escape(&self.version),
            build_id = self.build_id,
            url = xml_escape(&self.url),
            hash = hash,
            size = size,
        )
    }

    /// Hash `package` and write the manifest to `dest`.
    pub fn write_manifest(&self, package: &Path, dest: &Path) -> Result<()> {
        let (hash, size) = digest_file::<Sha512>(package)?;
        write_atomic(dest, self.render_manifest(size, &hash).as_bytes())
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
