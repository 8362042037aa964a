//! Batch object keys and their assembly into complete batches.
//!
//! A batch is backed by three objects in a bucket:
//!
//! ```text
//! <aggregationID>/YYYY/MM/DD/HH/mm/<batchID>.<infix>
//! <aggregationID>/YYYY/MM/DD/HH/mm/<batchID>.<infix>.avro
//! <aggregationID>/YYYY/MM/DD/HH/mm/<batchID>.<infix>.sig
//! ```
//!
//! where `<infix>` is `batch` for ingestion batches and `validity_0` or
//! `validity_1` for validation batches. A batch may only be scheduled
//! once all three objects are present.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::time::fmt_timestamp;

/// A batch's identity and which of its backing objects have been seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPath {
    aggregation_id: String,
    id: String,
    time: DateTime<Utc>,
    header: bool,
    packet_file: bool,
    signature: bool,
}

/// Complete batches ordered ascending by `(time, id)`.
pub type BatchList = Vec<BatchPath>;

impl BatchPath {
    /// Parses a suffix-free batch key like
    /// `kittens-seen/2020/10/31/20/29/b8a5579a-f984-460a-a42d-2813cbf57771`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchPath`] when the key does not have exactly
    /// seven components or its date components are not valid decimal
    /// integers forming a real UTC timestamp.
    pub fn parse(key: &str) -> Result<Self> {
        let time = key_time(key)?;
        let components: Vec<&str> = key.split('/').collect();
        Ok(Self {
            aggregation_id: components[0].to_string(),
            id: components[6].to_string(),
            time,
            header: false,
            packet_file: false,
            signature: false,
        })
    }

    /// The aggregation this batch belongs to.
    #[must_use]
    pub fn aggregation_id(&self) -> &str {
        &self.aggregation_id
    }

    /// The batch's UUID-shaped identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The batch's wall-clock time, minute precision, UTC.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// The `YYYY/MM/DD/HH/mm` rendering of the batch time.
    #[must_use]
    pub fn date_string(&self) -> String {
        fmt_timestamp(self.time)
    }

    /// The suffix-free object key for this batch. Inverse of [`parse`].
    ///
    /// [`parse`]: BatchPath::parse
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("{}/{}/{}", self.aggregation_id, self.date_string(), self.id)
    }

    /// True once the header, packet file and signature have all been seen.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.header && self.packet_file && self.signature
    }
}

impl fmt::Display for BatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} {} {} files:{}{}{}}}",
            self.aggregation_id,
            self.date_string(),
            self.id,
            u8::from(self.header),
            u8::from(self.packet_file),
            u8::from(self.signature),
        )
    }
}

fn parse_date_component<T: std::str::FromStr>(key: &str, component: &str) -> Result<T> {
    component
        .parse()
        .map_err(|_| Error::batch_path(key, format!("invalid date component {component:?}")))
}

/// Extracts the timestamp embedded in a batch object key, tolerating any
/// trailing filename suffix. Used for client-side interval filtering of
/// bucket listings.
///
/// # Errors
///
/// Returns [`Error::BatchPath`] for keys without the expected
/// `<agg>/Y/M/D/H/m/<file>` shape.
pub fn key_time(key: &str) -> Result<DateTime<Utc>> {
    let components: Vec<&str> = key.split('/').collect();
    if components.len() != 7 {
        return Err(Error::batch_path(
            key,
            format!("expected 7 path components, got {}", components.len()),
        ));
    }

    let year: i32 = parse_date_component(key, components[1])?;
    let month: u32 = parse_date_component(key, components[2])?;
    let day: u32 = parse_date_component(key, components[3])?;
    let hour: u32 = parse_date_component(key, components[4])?;
    let minute: u32 = parse_date_component(key, components[5])?;

    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .ok_or_else(|| Error::batch_path(key, "date components out of range"))
}

/// Fuses a bucket listing into the list of batches ready for scheduling.
///
/// Keys are grouped by stripping the `.{infix}`, `.{infix}.avro` and
/// `.{infix}.sig` suffixes; keys carrying none of them are skipped.
/// Groups missing any of the three objects are logged and excluded.
/// The result is sorted ascending by `(time, id)` so earlier telemetry
/// is scheduled first.
///
/// # Errors
///
/// Returns [`Error::BatchPath`] when a grouped key's base does not parse;
/// the bucket listing layer filters unparseable names beforehand, so in
/// practice this only surfaces programming errors.
pub fn ready_batches(keys: &[String], infix: &str) -> Result<BatchList> {
    let header_suffix = format!(".{infix}");
    let packet_suffix = format!(".{infix}.avro");
    let signature_suffix = format!(".{infix}.sig");

    let mut batches: BTreeMap<String, BatchPath> = BTreeMap::new();
    for key in keys {
        let (base, mark): (&str, fn(&mut BatchPath)) =
            if let Some(base) = key.strip_suffix(&packet_suffix) {
                (base, |b| b.packet_file = true)
            } else if let Some(base) = key.strip_suffix(&signature_suffix) {
                (base, |b| b.signature = true)
            } else if let Some(base) = key.strip_suffix(&header_suffix) {
                (base, |b| b.header = true)
            } else {
                tracing::debug!(key = %key, infix = infix, "skipping object with unrecognized suffix");
                continue;
            };

        let batch = match batches.entry(base.to_string()) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(BatchPath::parse(base)?)
            }
        };
        mark(batch);
    }

    let mut ready: BatchList = Vec::with_capacity(batches.len());
    for batch in batches.into_values() {
        if batch.is_complete() {
            ready.push(batch);
        } else {
            tracing::info!(batch = %batch, "ignoring incomplete batch");
        }
    }

    ready.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    Ok(ready)
}
