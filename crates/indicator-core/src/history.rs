//! Two-resolution history of every tracked quantity.
//!
//! Each quantity keeps a 48-slot ring of half-hour means (the last 24 hours)
//! and a 7-slot ring of daily extrema (the last week). Rings are ordered
//! oldest first; the last slot is the most recent.
//!
//! Rings heal themselves after clock discontinuities: [`HistoryStore::check_consistency`]
//! clears or shift-merges rings whose timestamps no longer line up with the
//! wall clock, and inserts deduplicate on the local calendar bucket.
//!
//! The whole store serializes to one fixed-size blob ([`HISTORY_BLOB_LEN`]
//! bytes) so it can be persisted after every rollover.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info};

use indicator_types::{
    BUCKET_SECONDS, DAY_SECONDS, DAY_SLOTS, DayMinMaxSlot, HalfHourSlot, HistoryView, ParseError,
    ParseResult, QUANTITY_COUNT, Quantity, WEEK_SLOTS,
};

use crate::aggregate::PresentAggregate;

/// Wall-clock readings before this instant (2020-01-01T00:00:00Z) mean the
/// clock has not been synchronised yet.
pub const MIN_VALID_TIMESTAMP: i64 = 1_577_836_800;

/// Encoded size of one [`SensorHistoryDataset`].
pub const DATASET_LEN: usize =
    DAY_SLOTS * HalfHourSlot::ENCODED_LEN + WEEK_SLOTS * DayMinMaxSlot::ENCODED_LEN;

/// Encoded size of the persisted history of every quantity.
pub const HISTORY_BLOB_LEN: usize = QUANTITY_COUNT * DATASET_LEN;

/// Which of the two rings an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingKind {
    /// 48 half-hour means.
    HalfHour,
    /// 7 daily min/max pairs.
    Day,
}

impl RingKind {
    /// Width of one slot in seconds.
    #[must_use]
    pub fn period(self) -> i64 {
        match self {
            RingKind::HalfHour => BUCKET_SECONDS,
            RingKind::Day => DAY_SECONDS,
        }
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn slots(self) -> usize {
        match self {
            RingKind::HalfHour => DAY_SLOTS,
            RingKind::Day => WEEK_SLOTS,
        }
    }

    /// Largest slot-index gap allowed between adjacent valid slots.
    #[must_use]
    pub fn max_gap(self) -> i64 {
        match self {
            RingKind::HalfHour => 3,
            RingKind::Day => 1,
        }
    }
}

impl std::fmt::Display for RingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RingKind::HalfHour => "day",
            RingKind::Day => "week",
        })
    }
}

/// Index of the half-hour bucket of the local day, `0..48`.
///
/// ```
/// use indicator_core::history::bucket_index;
/// use time::UtcOffset;
///
/// // 2024-03-01T13:45:00Z
/// assert_eq!(bucket_index(1_709_300_700, UtcOffset::UTC), 27);
/// let cest = UtcOffset::from_hms(2, 0, 0).unwrap();
/// assert_eq!(bucket_index(1_709_300_700, cest), 31);
/// ```
#[must_use]
pub fn bucket_index(timestamp: i64, offset: UtcOffset) -> u8 {
    // rem_euclid keeps this in 0..86400, so the quotient fits.
    (local_seconds(timestamp, offset).rem_euclid(DAY_SECONDS) / BUCKET_SECONDS) as u8
}

/// Day of the local month, `1..=31`.
///
/// Returns 0 for timestamps outside the calendar range of [`time`].
#[must_use]
pub fn day_of_month(timestamp: i64, offset: UtcOffset) -> u8 {
    OffsetDateTime::from_unix_timestamp(local_seconds(timestamp, offset))
        .map(|dt| dt.day())
        .unwrap_or(0)
}

/// Absolute number of the local slot containing `timestamp`.
///
/// Unlike [`bucket_index`] this differs for the same time of day on
/// different days.
#[must_use]
pub fn local_slot(timestamp: i64, offset: UtcOffset, ring: RingKind) -> i64 {
    local_seconds(timestamp, offset).div_euclid(ring.period())
}

/// Start of the local slot containing `timestamp`, as a Unix timestamp.
#[must_use]
pub fn slot_start(timestamp: i64, offset: UtcOffset, ring: RingKind) -> i64 {
    local_slot(timestamp, offset, ring) * ring.period() - i64::from(offset.whole_seconds())
}

fn local_seconds(timestamp: i64, offset: UtcOffset) -> i64 {
    timestamp.saturating_add(i64::from(offset.whole_seconds()))
}

/// Why a consistency check cleared a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// The newest slot lies in the future: the clock went backwards.
    Ahead,
    /// Two adjacent valid slots are this many slots apart.
    Gap(i64),
    /// Every slot is older than the ring span.
    Expired,
}

/// Result of checking one ring against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The newest slot is in the reference slot.
    Current,
    /// The ring was shifted, keeping `retained` trailing slots.
    Merged { retained: usize },
    /// The ring was wiped.
    Cleared(ClearReason),
}

trait RingSlot: Copy + Default {
    fn is_valid(&self) -> bool;
    fn timestamp(&self) -> i64;
    fn placeholder(timestamp: i64) -> Self;
}

impl RingSlot for HalfHourSlot {
    fn is_valid(&self) -> bool {
        self.valid
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn placeholder(timestamp: i64) -> Self {
        HalfHourSlot::placeholder(timestamp)
    }
}

impl RingSlot for DayMinMaxSlot {
    fn is_valid(&self) -> bool {
        self.valid
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn placeholder(timestamp: i64) -> Self {
        DayMinMaxSlot::placeholder(timestamp)
    }
}

/// Slot numbers are local, so a ring stamped at local boundaries lines up
/// with `reference` whatever the offset.
fn check_ring<S: RingSlot, const N: usize>(
    ring: &mut [S; N],
    kind: RingKind,
    reference: i64,
    offset: UtcOffset,
) -> CheckOutcome {
    let period = kind.period();
    let slot = |timestamp: i64| local_slot(timestamp, offset, kind);
    let newest = slot(ring[N - 1].timestamp());
    let current = slot(reference);
    let span = (N - 1) as i64;

    if newest > current {
        *ring = [S::default(); N];
        return CheckOutcome::Cleared(ClearReason::Ahead);
    }

    for pair in ring.windows(2) {
        if !(pair[0].is_valid() && pair[1].is_valid()) {
            continue;
        }
        let gap = slot(pair[1].timestamp()) - slot(pair[0].timestamp());
        if !(1..=kind.max_gap()).contains(&gap) {
            *ring = [S::default(); N];
            return CheckOutcome::Cleared(ClearReason::Gap(gap));
        }
    }

    if newest == current {
        return CheckOutcome::Current;
    }

    if newest < current - span {
        *ring = [S::default(); N];
        return CheckOutcome::Cleared(ClearReason::Expired);
    }

    // newest is in [current - span, current), so 1 <= retained <= span.
    let retained = (newest - (current - span) + 1) as usize;
    let start = slot_start(reference, offset, kind);
    let old = *ring;
    for (i, slot) in ring.iter_mut().enumerate() {
        *slot = if i < retained {
            old[N - retained + i]
        } else {
            S::placeholder(start - (N - 1 - i) as i64 * period)
        };
    }
    CheckOutcome::Merged { retained }
}

/// Shift every slot down by one, re-stamping invalid ones relative to `now`.
fn shift_ring<S: RingSlot, const N: usize>(
    ring: &mut [S; N],
    period: i64,
    now: i64,
    restamp: impl Fn(S, i64) -> S,
) {
    ring.copy_within(1.., 0);
    for (i, slot) in ring.iter_mut().enumerate().take(N - 1) {
        if !slot.is_valid() {
            *slot = restamp(*slot, now - (N - 1 - i) as i64 * period);
        }
    }
}

/// Both history rings of one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorHistoryDataset {
    pub day: [HalfHourSlot; DAY_SLOTS],
    pub week: [DayMinMaxSlot; WEEK_SLOTS],
}

impl Default for SensorHistoryDataset {
    fn default() -> Self {
        Self {
            day: [HalfHourSlot::default(); DAY_SLOTS],
            week: [DayMinMaxSlot::default(); WEEK_SLOTS],
        }
    }
}

impl SensorHistoryDataset {
    /// Check the half-hour ring against the local bucket of `reference`.
    pub fn check_day(&mut self, reference: i64, offset: UtcOffset) -> CheckOutcome {
        check_ring(&mut self.day, RingKind::HalfHour, reference, offset)
    }

    /// Check the week ring against the local day of `reference`.
    pub fn check_week(&mut self, reference: i64, offset: UtcOffset) -> CheckOutcome {
        check_ring(&mut self.week, RingKind::Day, reference, offset)
    }

    /// Close the current half-hour bucket into the ring.
    ///
    /// Does nothing if the newest slot already lies in the same local
    /// bucket as `now`. Otherwise the ring shifts, the oldest slot is
    /// evicted and the new head holds the bucket mean (invalid if the bucket
    /// saw no sample). The bucket half of `aggregate` is reset.
    ///
    /// Returns whether the ring changed.
    pub fn insert_day(
        &mut self,
        aggregate: &mut PresentAggregate,
        now: i64,
        offset: UtcOffset,
    ) -> bool {
        let head = self.day[DAY_SLOTS - 1].timestamp;
        if local_slot(head, offset, RingKind::HalfHour) == local_slot(now, offset, RingKind::HalfHour)
        {
            return false;
        }

        shift_ring(&mut self.day, BUCKET_SECONDS, now, |s, ts| HalfHourSlot {
            timestamp: ts,
            ..s
        });
        self.day[DAY_SLOTS - 1] = match aggregate.take_bucket() {
            Some(mean) => HalfHourSlot {
                value: mean,
                valid: true,
                timestamp: now,
            },
            None => HalfHourSlot::placeholder(now),
        };
        true
    }

    /// Close the current day into the week ring.
    ///
    /// Same discipline as [`insert_day`](Self::insert_day), keyed on the
    /// local calendar day and using the day extrema.
    pub fn insert_week(
        &mut self,
        aggregate: &mut PresentAggregate,
        now: i64,
        offset: UtcOffset,
    ) -> bool {
        let head = self.week[WEEK_SLOTS - 1].timestamp;
        if local_slot(head, offset, RingKind::Day) == local_slot(now, offset, RingKind::Day) {
            return false;
        }

        shift_ring(&mut self.week, DAY_SECONDS, now, |s, ts| DayMinMaxSlot {
            timestamp: ts,
            ..s
        });
        self.week[WEEK_SLOTS - 1] = match aggregate.take_day() {
            Some((min, max)) => DayMinMaxSlot {
                min,
                max,
                valid: true,
                timestamp: now,
            },
            None => DayMinMaxSlot::placeholder(now),
        };
        true
    }

    /// Read-side copy with extrema.
    #[must_use]
    pub fn view(&self, quantity: Quantity) -> HistoryView {
        HistoryView::new(quantity, &self.day, &self.week)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for slot in &self.day {
            slot.encode(buf);
        }
        for slot in &self.week {
            slot.encode(buf);
        }
    }

    fn decode(buf: &mut &[u8]) -> Self {
        let mut dataset = Self::default();
        for slot in dataset.day.iter_mut() {
            *slot = HalfHourSlot::decode(buf);
        }
        for slot in dataset.week.iter_mut() {
            *slot = DayMinMaxSlot::decode(buf);
        }
        dataset
    }
}

/// Aggregates and history rings of every quantity.
///
/// This is the single history-domain value the service keeps behind one
/// lock. All methods are bounded, CPU-only work.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    aggregates: [PresentAggregate; QUANTITY_COUNT],
    datasets: [SensorHistoryDataset; QUANTITY_COUNT],
    offset: UtcOffset,
    /// Wall clock at the last check or [`ensure_checked`](Self::ensure_checked) call.
    last_seen: Option<i64>,
}

impl HistoryStore {
    /// Empty history for the given local UTC offset.
    #[must_use]
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            aggregates: [PresentAggregate::default(); QUANTITY_COUNT],
            datasets: std::array::from_fn(|_| SensorHistoryDataset::default()),
            offset,
            last_seen: None,
        }
    }

    /// Restore from a persisted blob.
    ///
    /// A missing or wrongly sized blob yields an empty store.
    #[must_use]
    pub fn restore(blob: Option<&[u8]>, offset: UtcOffset) -> Self {
        let mut store = Self::new(offset);
        match blob.map(decode_history) {
            Some(Ok(datasets)) => {
                info!("Restored sensor history");
                store.datasets = datasets;
            }
            Some(Err(e)) => info!("Ignoring persisted sensor history: {}", e),
            None => info!("No persisted sensor history"),
        }
        store
    }

    /// The UTC offset used for local bucket math.
    #[must_use]
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Feed one accepted sample into the quantity's aggregate.
    pub fn update(&mut self, quantity: Quantity, value: f32) {
        self.aggregates[quantity.index()].update(value);
    }

    #[must_use]
    pub fn aggregate(&self, quantity: Quantity) -> &PresentAggregate {
        &self.aggregates[quantity.index()]
    }

    #[must_use]
    pub fn dataset(&self, quantity: Quantity) -> &SensorHistoryDataset {
        &self.datasets[quantity.index()]
    }

    pub fn dataset_mut(&mut self, quantity: Quantity) -> &mut SensorHistoryDataset {
        &mut self.datasets[quantity.index()]
    }

    /// Check every ring against the wall clock.
    ///
    /// Each ring is compared with the start of its last completed period
    /// (`now - period`), which is the boundary the first rollover after a
    /// restart is stamped with. Returns the number of rings that were
    /// cleared.
    pub fn check_consistency(&mut self, now: i64) -> usize {
        let offset = self.offset;
        let mut cleared = 0;
        for (quantity, dataset) in Quantity::ALL.iter().zip(self.datasets.iter_mut()) {
            let outcomes = [
                (RingKind::HalfHour, dataset.check_day(now - BUCKET_SECONDS, offset)),
                (RingKind::Day, dataset.check_week(now - DAY_SECONDS, offset)),
            ];
            for (ring, outcome) in outcomes {
                match outcome {
                    CheckOutcome::Current => debug!("{} {} history is current", quantity, ring),
                    CheckOutcome::Merged { retained } => {
                        info!("{} {} history: kept {} slots", quantity, ring, retained);
                    }
                    CheckOutcome::Cleared(reason) => {
                        info!("{} {} history cleared: {:?}", quantity, ring, reason);
                        cleared += 1;
                    }
                }
            }
        }
        self.last_seen = Some(now);
        cleared
    }

    /// Run [`check_consistency`](Self::check_consistency) if it has not run
    /// yet, or if the wall clock moved backwards or skipped more than one
    /// half-hour since the previous call.
    ///
    /// Returns whether the check ran.
    pub fn ensure_checked(&mut self, now: i64) -> bool {
        let due = match self.last_seen {
            None => true,
            Some(last) if now < last => {
                info!("Wall clock moved back from {} to {}, rechecking history", last, now);
                true
            }
            Some(last) if now - last > 2 * BUCKET_SECONDS => {
                info!("Wall clock skipped from {} to {}, rechecking history", last, now);
                true
            }
            Some(_) => false,
        };
        if due {
            self.check_consistency(now);
        } else {
            self.last_seen = Some(now);
        }
        due
    }

    /// Timestamp of the newest slot of `ring` across every quantity.
    #[must_use]
    pub fn head(&self, ring: RingKind) -> i64 {
        self.datasets
            .iter()
            .map(|dataset| match ring {
                RingKind::HalfHour => dataset.day[DAY_SLOTS - 1].timestamp,
                RingKind::Day => dataset.week[WEEK_SLOTS - 1].timestamp,
            })
            .max()
            .unwrap_or(0)
    }

    /// A rollover clock that continues from the restored rings.
    ///
    /// Run the consistency check first so the heads line up with the wall
    /// clock.
    #[must_use]
    pub fn rollover_clock(&self) -> RolloverClock {
        RolloverClock::resume(
            self.offset,
            self.head(RingKind::HalfHour),
            self.head(RingKind::Day),
        )
    }

    /// Apply a rollover of `ring` at `boundary` to every quantity.
    ///
    /// Returns whether any ring changed, i.e. whether the store needs to be
    /// persisted.
    pub fn rollover(&mut self, ring: RingKind, boundary: i64) -> bool {
        let offset = self.offset;
        let mut changed = false;
        for (aggregate, dataset) in self.aggregates.iter_mut().zip(self.datasets.iter_mut()) {
            changed |= match ring {
                RingKind::HalfHour => dataset.insert_day(aggregate, boundary, offset),
                RingKind::Day => dataset.insert_week(aggregate, boundary, offset),
            };
        }
        changed
    }

    /// Both rings of a quantity with their extrema.
    #[must_use]
    pub fn get_history(&self, quantity: Quantity) -> HistoryView {
        self.dataset(quantity).view(quantity)
    }

    /// Serialize every dataset into the fixed persisted layout.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        encode_history(&self.datasets)
    }
}

/// Serialize datasets in [`Quantity::ALL`] order.
#[must_use]
pub fn encode_history(datasets: &[SensorHistoryDataset; QUANTITY_COUNT]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HISTORY_BLOB_LEN);
    for dataset in datasets {
        dataset.encode(&mut buf);
    }
    buf
}

/// Parse the fixed persisted layout.
///
/// # Errors
///
/// Returns [`ParseError::SizeMismatch`] unless `data` is exactly
/// [`HISTORY_BLOB_LEN`] bytes.
pub fn decode_history(data: &[u8]) -> ParseResult<[SensorHistoryDataset; QUANTITY_COUNT]> {
    if data.len() != HISTORY_BLOB_LEN {
        return Err(ParseError::SizeMismatch {
            expected: HISTORY_BLOB_LEN,
            actual: data.len(),
        });
    }
    let mut buf = data;
    Ok(std::array::from_fn(|_| SensorHistoryDataset::decode(&mut buf)))
}

/// A ring that has to be rolled over, with the boundary it closes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverEvent {
    pub ring: RingKind,
    pub boundary: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RingClock {
    last_index: Option<u8>,
    last_boundary: Option<i64>,
    /// Newest restored slot, consulted on the first tick only.
    restored: Option<i64>,
}

/// Decides, tick by tick, when the rings roll over.
///
/// A ring rolls over when the local bucket index (or day of month) differs
/// from the one seen at the previous rollover *and* at least one full
/// period has elapsed since the previous boundary.
///
/// The first rollover after start is stamped with the start of the
/// previous period, unless the clock was [resumed](Self::resume) from rings
/// whose newest slot already is that period: then nothing is emitted and
/// samples collected since start close into the current period. After the
/// wall clock jumps backwards or skips periods, the next rollover is again
/// stamped with the previous period.
#[derive(Debug, Clone)]
pub struct RolloverClock {
    offset: UtcOffset,
    half_hour: RingClock,
    day: RingClock,
}

impl RolloverClock {
    #[must_use]
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            offset,
            half_hour: RingClock::default(),
            day: RingClock::default(),
        }
    }

    /// Like [`new`](Self::new), continuing from rings whose newest slots are
    /// stamped `half_hour_head` and `day_head`.
    #[must_use]
    pub fn resume(offset: UtcOffset, half_hour_head: i64, day_head: i64) -> Self {
        let restored = |head: i64| RingClock {
            restored: Some(head),
            ..RingClock::default()
        };
        Self {
            offset,
            half_hour: restored(half_hour_head),
            day: restored(day_head),
        }
    }

    /// Whether `now` looks like a synchronised wall clock.
    #[must_use]
    pub fn clock_is_set(now: i64) -> bool {
        now >= MIN_VALID_TIMESTAMP
    }

    /// Evaluate one tick. Returns the rollovers due at `now`, half-hour
    /// first.
    pub fn tick(&mut self, now: i64) -> Vec<RolloverEvent> {
        if !Self::clock_is_set(now) {
            info!("Wall clock not set ({}), skipping history tick", now);
            return Vec::new();
        }

        let offset = self.offset;
        let mut events = Vec::with_capacity(2);
        if let Some(boundary) = Self::advance(
            &mut self.half_hour,
            RingKind::HalfHour,
            bucket_index(now, offset),
            now,
            offset,
        ) {
            events.push(RolloverEvent {
                ring: RingKind::HalfHour,
                boundary,
            });
        }
        if let Some(boundary) =
            Self::advance(&mut self.day, RingKind::Day, day_of_month(now, offset), now, offset)
        {
            events.push(RolloverEvent {
                ring: RingKind::Day,
                boundary,
            });
        }
        events
    }

    fn advance(
        clock: &mut RingClock,
        ring: RingKind,
        index: u8,
        now: i64,
        offset: UtcOffset,
    ) -> Option<i64> {
        let open = slot_start(now, offset, ring);
        let previous = slot_start(now - ring.period(), offset, ring);

        if clock.last_boundary.is_some_and(|last| now < last) {
            info!("Wall clock moved back into an earlier {} period", ring);
            *clock = RingClock::default();
        }
        if let Some(head) = clock.restored.take() {
            if clock.last_boundary.is_none() && slot_start(head, offset, ring) == previous {
                debug!("{} history already closed at {}", ring, previous);
                clock.last_index = Some(index);
                clock.last_boundary = Some(open);
                return None;
            }
        }

        if clock.last_index == Some(index) {
            return None;
        }
        if clock
            .last_boundary
            .is_some_and(|last| now - last < ring.period())
        {
            return None;
        }

        clock.last_index = Some(index);
        let boundary = match clock.last_boundary {
            Some(last) if last != previous => {
                info!("Missed {} rollovers after {}, closing {}", ring, last, previous);
                previous
            }
            Some(last) => last,
            None => previous,
        };
        clock.last_boundary = Some(open);
        debug!("Rolling over {} history at {}", ring, boundary);
        Some(boundary)
    }
}
