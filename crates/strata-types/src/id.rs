use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

use crate::error::TypeError;

/// Bits of a v7 UUID available to the monotonic counter: 12 in `rand_a`
/// and 62 in `rand_b`.
const COUNTER_BITS: u32 = 74;
const COUNTER_MAX: u128 = (1u128 << COUNTER_BITS) - 1;
const RAND_B_BITS: u32 = 62;
const RAND_B_MASK: u128 = (1u128 << RAND_B_BITS) - 1;
const TIMESTAMP_MAX: u64 = (1u64 << 48) - 1;

/// Time-ordered identifier for one immutable object version (UUID v7).
///
/// The 48-bit millisecond timestamp leads, followed by a counter spread over
/// the random fields. The hyphenated lowercase text form has fixed width, so
/// ids sort the same way as values and as strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Uuid);

impl VersionId {
    /// The nil UUID. Marks an unset version pointer and is never produced by
    /// an [`IdGenerator`].
    pub const UNSET: VersionId = VersionId(Uuid::nil());

    /// Assemble an id from its timestamp and counter. Excess bits are masked.
    pub fn from_parts(timestamp_ms: u64, counter: u128) -> Self {
        let counter = counter & COUNTER_MAX;
        let mut bytes = [0u8; 10];
        bytes[..2].copy_from_slice(&((counter >> RAND_B_BITS) as u16).to_be_bytes());
        bytes[2..].copy_from_slice(&((counter & RAND_B_MASK) as u64).to_be_bytes());
        Self(Builder::from_unix_timestamp_millis(timestamp_ms & TIMESTAMP_MAX, &bytes).into_uuid())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Milliseconds since the UNIX epoch encoded in this id.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0.as_u128() >> 80) as u64
    }

    /// The 74-bit monotonic counter.
    pub fn counter(&self) -> u128 {
        let raw = self.0.as_u128();
        (((raw >> 64) & 0xfff) << RAND_B_BITS) | (raw & RAND_B_MASK)
    }

    /// Returns `true` for [`VersionId::UNSET`].
    pub fn is_unset(&self) -> bool {
        self.0.is_nil()
    }

    /// Short form (last 8 characters, the most varying part).
    pub fn short_id(&self) -> String {
        let text = self.0.to_string();
        text[text.len() - 8..].to_string()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl FromStr for VersionId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidVersionId {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Monotonic [`VersionId`] source.
///
/// - A call in a new millisecond draws a fresh random counter.
/// - A call in the same (or an earlier, if the wall clock stepped back)
///   millisecond reuses the last timestamp and increments the counter.
/// - If the counter would overflow, the timestamp advances by one
///   millisecond.
///
/// Ids from one generator are therefore strictly increasing in call order.
pub struct IdGenerator {
    last: Mutex<VersionId>,
}

impl IdGenerator {
    /// Create an independent generator.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(VersionId::UNSET),
        }
    }

    /// The process-wide generator. Stores that share it produce one
    /// increasing sequence between them.
    pub fn shared() -> Arc<IdGenerator> {
        static SHARED: OnceLock<Arc<IdGenerator>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(IdGenerator::new())))
    }

    /// Generate the next id from the wall clock.
    pub fn next(&self) -> VersionId {
        self.next_at(wall_clock_ms())
    }

    /// Generate the next id as if the wall clock read `now_ms`.
    pub fn next_at(&self, now_ms: u64) -> VersionId {
        // The guarded value is a plain id, consistent even after a panic.
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now_ms = now_ms.min(TIMESTAMP_MAX);
        let last_ms = last.timestamp_ms();
        let next = if last.is_unset() || now_ms > last_ms {
            VersionId::from_parts(now_ms, random_counter())
        } else if last.counter() < COUNTER_MAX {
            VersionId::from_parts(last_ms, last.counter() + 1)
        } else {
            VersionId::from_parts(last_ms + 1, random_counter())
        };

        *last = next;
        next
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

/// Random counter with the top bit clear, leaving room to increment within
/// the same millisecond.
fn random_counter() -> u128 {
    rand::thread_rng().gen::<u128>() & (COUNTER_MAX >> 1)
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identifier grouping one or more versions written as a batch.
///
/// Callers may choose any non-empty string. A write without an explicit job
/// becomes a singleton job named after its own version id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job id from caller-supplied text.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::EmptyJobId);
        }
        Ok(Self(id))
    }

    /// The job id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<VersionId> for JobId {
    fn from(version: VersionId) -> Self {
        Self(version.to_string())
    }
}

impl FromStr for JobId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
