use rand::{rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};

pub const CODE_LEN: usize = 6;

/// Issues numeric one-time codes and their expiry timestamps.
#[derive(Debug, Clone, Copy)]
pub struct OtpGenerator {
    ttl: Duration,
}

impl Default for OtpGenerator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl OtpGenerator {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.whole_minutes()
    }

    /// Uniform over 000000..=999999, drawn from the OS CSPRNG.
    pub fn generate_code(&self) -> String {
        let n: u32 = OsRng.gen_range(0..1_000_000);
        format!("{:06}", n)
    }

    pub fn expiry_for(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + self.ttl
    }

    /// Fresh `(code, expiry)` pair.
    pub fn issue(&self, now: OffsetDateTime) -> (String, OffsetDateTime) {
        (self.generate_code(), self.expiry_for(now))
    }

    pub fn is_expired(&self, expiry: Option<OffsetDateTime>) -> bool {
        self.is_expired_at(expiry, OffsetDateTime::now_utc())
    }

    /// A missing expiry counts as expired.
    pub fn is_expired_at(&self, expiry: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        match expiry {
            Some(at) => now > at,
            None => true,
        }
    }
}

/// Exactly six ASCII digits.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
