use crate::audit::classify::{AccountEntry, Classification, LinkTemplate};
use crate::audit::ids::ItemId;
use crate::audit::models::{FeePolicy, format_amount};
use crate::market::ChunkFailure;
use std::path::Path;
use thiserror::Error;

pub const CURRENCY: &str = "RUB";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove report `{path}`: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub classification: &'a Classification,
    pub duplicates: &'a [ItemId],
    pub failures: &'a [ChunkFailure],
    pub fee: FeePolicy,
    pub links: &'a LinkTemplate,
}

pub fn render_report(input: ReportInput<'_>) -> String {
    let c = input.classification;
    let fee = input.fee;
    let deducted = fee.deducted_percent();
    let mut out = String::new();

    out.push_str(&format!("📊 Sold accounts: {}\n", c.sold.len()));
    out.push_str(&format!("🔒 Unsold accounts: {}\n\n", c.unsold.len()));

    out.push_str(&format!(
        "💰 Total of all sold accounts: {} {CURRENCY} (-{deducted}%: {})\n",
        format_amount(c.total_sold),
        fee.apply(c.total_sold),
    ));
    push_entries(&mut out, &c.sold);

    out.push_str("\n🛡️ Unsold accounts:\n");
    push_entries(&mut out, &c.unsold);
    out.push_str(&format!(
        "\n💵 Current total of unsold accounts: {} {CURRENCY} (-{deducted}%: {})\n",
        format_amount(c.total_unsold),
        fee.apply(c.total_unsold),
    ));

    out.push_str("\n🔍 Duplicates found:\n");
    if input.duplicates.is_empty() {
        out.push_str("❌ None\n");
    } else {
        for id in input.duplicates {
            out.push_str(&format!("❌ {}\n", input.links.bare(id)));
        }
    }

    if !c.deleted.is_empty() || !c.malformed.is_empty() {
        out.push_str("\n🗑️ Deleted / no access:\n");
        for entry in c.deleted.iter().chain(c.malformed.iter()) {
            out.push_str(&format!("- {entry}\n"));
        }
    }

    if !input.failures.is_empty() {
        out.push_str("\n⚠️ Lookup failed:\n");
        for failure in input.failures {
            out.push_str(&format!(
                "- chunk {} ({}): {} items\n",
                failure.index + 1,
                failure
                    .status
                    .map(|code| format!("HTTP {code}"))
                    .unwrap_or_else(|| failure.reason.clone()),
                failure.ids.len(),
            ));
            for id in &failure.ids {
                out.push_str(&format!("  {}\n", input.links.item(id)));
            }
        }
    }

    if !c.unpriced.is_empty() {
        out.push_str("\n❔ Price unknown (counted as 0):\n");
        for id in &c.unpriced {
            out.push_str(&format!("- {}\n", input.links.item(id)));
        }
    }

    out
}

fn push_entries(out: &mut String, entries: &[AccountEntry]) {
    for entry in entries {
        out.push_str(&format!("- {} - {}\n", entry.link, entry.price));
    }
}

/// Creates or truncates `path`, creating missing parent directories.
pub async fn write_report(path: &Path, body: &str) -> Result<(), ReportError> {
    let to_error = |source| ReportError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
    }
    tokio::fs::write(path, body.as_bytes())
        .await
        .map_err(to_error)
}

/// Deletes a delivered report. A file that is already gone is not an error.
pub async fn remove_report(path: &Path) -> Result<(), ReportError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ReportError::Remove {
            path: path.display().to_string(),
            source,
        }),
    }
}
