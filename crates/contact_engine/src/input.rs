use std::collections::BTreeMap;
use std::io::Read;

use contact_core::Target;
use contact_logging::{contact_info, contact_warn};
use thiserror::Error;

const URL_COLUMNS: [&str; 2] = ["url", "website"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input has no url or website column")]
    MissingUrlColumn,
    #[error("cannot read input: {0}")]
    Csv(#[from] csv::Error),
}

/// Read targets from CSV with a header row.
///
/// The first `url` or `website` column (any case) holds the target; every
/// other column is carried through to the output unchanged. Rows with a blank
/// URL are skipped, but still count towards `source_row`.
pub fn load_targets<R: Read>(reader: R) -> Result<Vec<Target>, InputError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let url_index = URL_COLUMNS
        .iter()
        .find_map(|wanted| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(wanted))
        })
        .ok_or(InputError::MissingUrlColumn)?;

    let mut targets = Vec::new();
    let mut skipped = 0usize;
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let url = record.get(url_index).unwrap_or_default();
        if url.is_empty() {
            skipped += 1;
            continue;
        }
        let passthrough: BTreeMap<String, String> = headers
            .iter()
            .enumerate()
            .filter(|(index, header)| *index != url_index && !header.is_empty())
            .map(|(index, header)| {
                let value = record.get(index).unwrap_or_default();
                (header.to_string(), value.to_string())
            })
            .collect();
        let target = Target::new(url, row).with_passthrough(passthrough);
        if target.fetch_url().is_none() {
            contact_warn!("Row {} has an unusable url {:?}", row, url);
        }
        targets.push(target);
    }

    contact_info!(
        "Loaded {} targets ({} rows without a url)",
        targets.len(),
        skipped
    );
    Ok(targets)
}
