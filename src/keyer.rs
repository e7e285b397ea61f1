//! Deterministic, collision-free key/value generation.
//!
//! A [`Keyer`] emits a lazy sequence of records with no key collisions
//! within its keyspace slice, so that a writer at space `s` can be followed
//! by a reader at the same space and is guaranteed to observe the same keys.
//! Keys come out either ASCII-printable (a 64-symbol alphabet) or binary
//! (8-byte little-endian words).
//!
//! The heart of it is a bit-width-selected injective mapping over the whole
//! key index range: the raw index is offset by a fixed prime, stirred with a
//! seeded box of 16-bit words, and pushed through a xorshift-multiply
//! bijection picked for the selected width. Distinct spaces therefore
//! enumerate disjoint key sets, while different sectors of one space
//! enumerate the same set starting at different phases.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::{OpError, OpResult, Record};

pub const SEED_BOX_SIZE: usize = 2048;

const ALPHABET: &[u8; 64] =
    b"@0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_";

/// Folded into every raw index before stirring; prime modulo
/// 2^{8,16,24,32,40,48,56,64}.
const FRACTAL_PRIME: u64 = 10_042_331_536_242_289_283;

/// Additive constant of the tail remix.
const TAIL_PRIME: u64 = 7_015_912_586_649_315_971;

const fn bitmask(bits: u32) -> u64 {
    !0u64 >> (64 - bits)
}

const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Fast remix used to stretch an injected point once its bits run out.
fn remix(point: u64) -> u64 {
    point ^ point.rotate_left(47).wrapping_add(TAIL_PRIME)
}

/// Process-wide key scrambling material.
///
/// Built once from the seed before any worker starts (seed 0 takes the wall
/// clock) and read-only afterwards; workers share it through an `Arc`.
pub struct SeedBox {
    words: [u16; SEED_BOX_SIZE],
}

impl SeedBox {
    pub fn new(mut seed: u64) -> SeedBox {
        if seed == 0 {
            seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(1);
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut words = [0u16; SEED_BOX_SIZE];
        for word in words.iter_mut() {
            *word = rng.gen();
        }
        SeedBox { words }
    }

    #[inline]
    fn stir(&self, x: u64) -> u64 {
        x ^ u64::from(self.words[(x & (SEED_BOX_SIZE as u64 - 1)) as usize])
    }
}

/// Shape of the key/value stream, identical for every generator of a run.
#[derive(Debug, Clone, Copy)]
pub struct KeyerOptions {
    pub binary: bool,
    /// Keys per keyspace; the serial wraps modulo this.
    pub count: u64,
    pub key_size: usize,
    pub value_size: usize,
    /// Total number of keyspaces the run may touch.
    pub spaces: u64,
    /// Number of starting phases within one keyspace.
    pub sectors: u64,
}

/// Generator of one keyspace slice. Each worker owns one or two.
pub struct Keyer {
    opts: KeyerOptions,
    /// Key material width in bytes, selected from the keyspace size.
    width: u32,
    base: u64,
    serial: u64,
    seed_box: Arc<SeedBox>,
}

impl Keyer {
    /// Builds a generator for `(space, sector)`.
    ///
    /// Panics when the keyspace exceeds 64-bit arithmetic or the key length
    /// cannot encode it; both are configuration errors and fatal.
    pub fn new(space: u64, sector: u64, opts: KeyerOptions, seed_box: Arc<SeedBox>) -> Keyer {
        let maxkey = opts.count.checked_mul(opts.spaces).unwrap_or(u64::MAX);
        assert!(maxkey >= 2, "key-gen: at least two keys are required");

        let bits: u32 = if maxkey < bitmask(16) {
            16
        } else if maxkey < bitmask(24) {
            24
        } else if maxkey < bitmask(32) {
            32
        } else if maxkey < bitmask(40) {
            40
        } else if maxkey < bitmask(48) {
            48
        } else if maxkey < bitmask(56) {
            56
        } else if maxkey < u64::MAX {
            64
        } else {
            panic!(
                "key-gen: {} sectors of {} items is too huge, unable to provide \
                 by 64-bit arithmetics, at least {} bits required",
                opts.sectors,
                opts.count,
                (maxkey as f64).log2().ceil()
            );
        };

        let radix = if opts.binary { 256.0 } else { ALPHABET.len() as f64 };
        let bytes_for_maxkey = (bitmask(bits) as f64).ln() / radix.ln();
        if bytes_for_maxkey > opts.key_size as f64 {
            panic!(
                "key-gen: key length {} is insufficient for {} sectors of {} {} \
                 items, at least {} required",
                opts.key_size,
                opts.sectors,
                opts.count,
                if opts.binary { "binary" } else { "printable" },
                bytes_for_maxkey.ceil()
            );
        }

        log::debug!("key-gen: using {} bits, up to {} keys", bits, maxkey);

        let mut serial = 0;
        if sector != 0 {
            serial = (opts.count * sector / opts.sectors) % opts.count;
        }

        Keyer {
            width: bits / 8,
            base: space * opts.count,
            serial,
            opts,
            seed_box,
        }
    }

    /// Bytes one pooled record occupies, separators and padding included.
    pub fn record_bytes(&self) -> usize {
        if self.opts.binary {
            align8(self.opts.key_size) + align8(self.opts.value_size)
        } else {
            let value = if self.opts.value_size > 0 {
                self.opts.value_size + 1
            } else {
                0
            };
            self.opts.key_size + 1 + value
        }
    }

    /// Maps x to y one-to-one over the selected width: a collision-free
    /// hash, since input and output cardinalities are equal. The "magic"
    /// odd primes were found and verified with a bit of brute force.
    fn injection(&self, x: u64) -> u64 {
        let x = self.seed_box.stir(x.wrapping_add(FRACTAL_PRIME));

        match self.width {
            1 => {
                let mut y = x as u8;
                y ^= y >> 1;
                y = y.wrapping_mul(113);
                y ^= y << 2;
                u64::from(y)
            }
            2 => {
                let mut y = x as u16;
                y ^= y >> 1;
                y = y.wrapping_mul(25_693);
                y ^= y << 7;
                u64::from(y)
            }
            3 => {
                let m = bitmask(24);
                let mut y = (x & m) as u32;
                y ^= y >> 1;
                y = y.wrapping_mul(5_537_317);
                y ^= y << 12;
                u64::from(y) & m
            }
            4 => {
                let mut y = x as u32;
                y ^= y >> 1;
                y = y.wrapping_mul(1_923_730_889);
                y ^= y << 15;
                u64::from(y)
            }
            5 => {
                let m = bitmask(40);
                let mut y = x & m;
                y ^= y >> 1;
                y = y.wrapping_mul(274_992_889_273);
                y ^= y << 13;
                y & m
            }
            6 => {
                let m = bitmask(48);
                let mut y = x & m;
                y ^= y >> 1;
                y = y.wrapping_mul(70_375_646_670_269);
                y ^= y << 15;
                y & m
            }
            7 => {
                let m = bitmask(56);
                let mut y = x & m;
                y ^= y >> 1;
                y = y.wrapping_mul(23_022_548_244_171_181);
                y ^= y << 4;
                y & m
            }
            8 => {
                let mut y = x;
                y ^= y >> 1;
                y = y.wrapping_mul(4_613_509_448_041_658_233);
                y ^= y << 25;
                y
            }
            _ => unreachable!("unsupported key width {}", self.width),
        }
    }

    /// Appends `length` bytes of material derived from `point`.
    ///
    /// Printable mode consumes 6 bits per symbol and refreshes the
    /// accumulator through [`remix`] when fewer than 6 bits remain. Binary
    /// mode appends whole 8-byte little-endian words, so it may overshoot
    /// `length` up to the next 8-byte boundary.
    fn fill(&self, point: &mut u64, dst: &mut Vec<u8>, length: usize) {
        debug_assert!(length > 0);
        let mut left = self.width * 8;

        if !self.opts.binary {
            let mut acc = *point;
            let mut remaining = length;
            loop {
                dst.push(ALPHABET[(acc & 63) as usize]);
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
                acc >>= 6;
                left -= 6;
                if left < 6 {
                    acc = remix(point.wrapping_add(acc));
                    *point = acc;
                    left = self.width * 8;
                }
            }
        } else {
            let mut remaining = length as isize;
            loop {
                dst.extend_from_slice(&point.to_le_bytes());
                remaining -= 8;
                if remaining <= 0 {
                    break;
                }
                loop {
                    *point = remix(*point);
                    left = left.saturating_add(left);
                    if left >= 64 {
                        break;
                    }
                }
            }
        }
    }

    fn record_pair_into(&self, point: u64, rec: &mut Record, vsize: usize) {
        rec.clear();
        let mut point = self.injection(point);
        self.fill(&mut point, &mut rec.key, self.opts.key_size);
        rec.key.truncate(self.opts.key_size);
        if vsize != 0 {
            point = remix(point);
            self.fill(&mut point, &mut rec.value, vsize);
            rec.value.truncate(vsize);
        }
    }

    /// Appends one record to a pool buffer in its on-wire layout:
    /// `key ∥ 0x00 ∥ value ∥ 0x00` for printable, 8-byte-aligned key and
    /// value blocks for binary.
    fn record_pair_buf(&self, point: u64, buf: &mut Vec<u8>) {
        let mut point = self.injection(point);
        self.fill(&mut point, buf, self.opts.key_size);
        if !self.opts.binary {
            buf.push(0);
        }
        if self.opts.value_size > 0 {
            point = remix(point);
            self.fill(&mut point, buf, self.opts.value_size);
            if !self.opts.binary {
                buf.push(0);
            }
        }
    }

    /// Overwrites `rec` with the next record of the slice and advances the
    /// serial. With `key_only` the value is left empty, but the key is still
    /// generated and the serial still moves.
    pub fn get(&mut self, rec: &mut Record, key_only: bool) {
        let point = self.base + self.serial;
        self.serial = (self.serial + 1) % self.opts.count;
        let vsize = if key_only { 0 } else { self.opts.value_size };
        self.record_pair_into(point, rec, vsize);
    }

    /// Pre-computes `pool_size` records into a contiguous buffer and returns
    /// a cursor over them.
    pub fn batch(&mut self, pool_size: usize) -> Batch {
        let mut buf = Vec::with_capacity(self.record_bytes() * pool_size);
        for _ in 0..pool_size {
            let point = self.base + self.serial;
            self.serial = (self.serial + 1) % self.opts.count;
            self.record_pair_buf(point, &mut buf);
        }
        Batch {
            buf,
            pos: 0,
            key_size: self.opts.key_size,
            value_size: self.opts.value_size,
            binary: self.opts.binary,
            record_bytes: self.record_bytes(),
        }
    }
}

/// A pool of pre-computed records, sliced out in emission order.
pub struct Batch {
    buf: Vec<u8>,
    pos: usize,
    key_size: usize,
    value_size: usize,
    binary: bool,
    record_bytes: usize,
}

impl Batch {
    /// Copies the next pooled record into `rec`; fails once the pool is
    /// drained.
    pub fn load(&mut self, rec: &mut Record) -> OpResult {
        if self.buf.len() - self.pos < self.record_bytes {
            return Err(OpError::Unexpected);
        }

        rec.clear();
        rec.key
            .extend_from_slice(&self.buf[self.pos..self.pos + self.key_size]);
        self.pos += if self.binary {
            align8(self.key_size)
        } else {
            self.key_size + 1
        };

        if self.value_size > 0 {
            rec.value
                .extend_from_slice(&self.buf[self.pos..self.pos + self.value_size]);
            self.pos += if self.binary {
                align8(self.value_size)
            } else {
                self.value_size + 1
            };
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn opts(count: u64, spaces: u64, sectors: u64, binary: bool) -> KeyerOptions {
        KeyerOptions {
            binary,
            count,
            key_size: if binary { 8 } else { 12 },
            value_size: 0,
            spaces,
            sectors,
        }
    }

    fn wrap_keys(keyer: &mut Keyer, count: u64) -> Vec<Vec<u8>> {
        let mut rec = Record::default();
        (0..count)
            .map(|_| {
                keyer.get(&mut rec, true);
                rec.key.clone()
            })
            .collect()
    }

    #[test]
    fn printable_keys_unique_and_deterministic() {
        let seed_box = Arc::new(SeedBox::new(7));
        let opts = opts(1000, 2, 1, false);

        let mut a = Keyer::new(0, 0, opts, seed_box.clone());
        let keys = wrap_keys(&mut a, 1000);
        let unique: BTreeSet<&Vec<u8>> = keys.iter().collect();
        assert_eq!(unique.len(), 1000);
        for key in &keys {
            assert_eq!(key.len(), 12);
            assert!(key.iter().all(|b| ALPHABET.contains(b)));
        }

        let mut b = Keyer::new(0, 0, opts, seed_box);
        assert_eq!(wrap_keys(&mut b, 1000), keys);
    }

    #[test]
    fn sectors_enumerate_the_same_set() {
        let seed_box = Arc::new(SeedBox::new(11));
        let opts = opts(1000, 4, 4, false);

        let reference: BTreeSet<Vec<u8>> = {
            let mut keyer = Keyer::new(2, 0, opts, seed_box.clone());
            wrap_keys(&mut keyer, 1000).into_iter().collect()
        };
        for sector in 1..4 {
            let mut keyer = Keyer::new(2, sector, opts, seed_box.clone());
            let set: BTreeSet<Vec<u8>> = wrap_keys(&mut keyer, 1000).into_iter().collect();
            assert_eq!(set, reference, "sector {sector}");
        }
    }

    #[test]
    fn spaces_are_disjoint() {
        let seed_box = Arc::new(SeedBox::new(3));
        let opts = opts(1000, 4, 1, false);

        let sets: Vec<BTreeSet<Vec<u8>>> = (0..4)
            .map(|space| {
                let mut keyer = Keyer::new(space, 0, opts, seed_box.clone());
                wrap_keys(&mut keyer, 1000).into_iter().collect()
            })
            .collect();
        for i in 0..4 {
            for j in i + 1..4 {
                assert!(sets[i].is_disjoint(&sets[j]), "spaces {i} and {j} collide");
            }
        }
    }

    #[test]
    fn binary_keys_round_trip_the_injection() {
        let seed_box = Arc::new(SeedBox::new(17));
        let opts = opts(1000, 1, 1, true);
        let mut keyer = Keyer::new(0, 0, opts, seed_box);
        assert_eq!(keyer.width, 2);

        let mut rec = Record::default();
        for serial in 0..1000u64 {
            keyer.get(&mut rec, true);
            assert_eq!(rec.key.len(), 8);
            let mut word = [0u8; 8];
            word.copy_from_slice(&rec.key);
            let decoded = u64::from_le_bytes(word) & bitmask(16);
            assert_eq!(decoded, keyer.injection(serial));
        }
    }

    #[test]
    fn values_are_deterministic_too() {
        let seed_box = Arc::new(SeedBox::new(5));
        let opts = KeyerOptions {
            binary: false,
            count: 100,
            key_size: 8,
            value_size: 32,
            spaces: 1,
            sectors: 1,
        };
        let mut a = Keyer::new(0, 0, opts, seed_box.clone());
        let mut b = Keyer::new(0, 0, opts, seed_box);
        let mut rec_a = Record::default();
        let mut rec_b = Record::default();
        for _ in 0..100 {
            a.get(&mut rec_a, false);
            b.get(&mut rec_b, false);
            assert_eq!(rec_a, rec_b);
            assert_eq!(rec_a.value.len(), 32);
        }
    }

    #[test]
    fn batch_pool_matches_single_shot() {
        let seed_box = Arc::new(SeedBox::new(23));
        let opts = KeyerOptions {
            binary: false,
            count: 64,
            key_size: 10,
            value_size: 16,
            spaces: 1,
            sectors: 1,
        };
        let mut pooled = Keyer::new(0, 0, opts, seed_box.clone());
        let mut single = Keyer::new(0, 0, opts, seed_box);

        let mut batch = pooled.batch(10);
        let mut from_pool = Record::default();
        let mut from_get = Record::default();
        for _ in 0..10 {
            batch.load(&mut from_pool).unwrap();
            single.get(&mut from_get, false);
            assert_eq!(from_pool, from_get);
        }
        assert_eq!(batch.load(&mut from_pool), Err(OpError::Unexpected));
        assert_eq!(pooled.serial, single.serial);
    }

    #[test]
    fn batch_pool_binary_layout() {
        let seed_box = Arc::new(SeedBox::new(29));
        let opts = KeyerOptions {
            binary: true,
            count: 16,
            key_size: 8,
            value_size: 8,
            spaces: 1,
            sectors: 1,
        };
        let mut pooled = Keyer::new(0, 0, opts, seed_box.clone());
        let mut single = Keyer::new(0, 0, opts, seed_box);

        let mut batch = pooled.batch(4);
        let mut from_pool = Record::default();
        let mut from_get = Record::default();
        for _ in 0..4 {
            batch.load(&mut from_pool).unwrap();
            single.get(&mut from_get, false);
            assert_eq!(from_pool, from_get);
        }
    }

    #[test]
    #[should_panic(expected = "insufficient")]
    fn short_keys_are_rejected() {
        let seed_box = Arc::new(SeedBox::new(1));
        let opts = KeyerOptions {
            binary: false,
            count: 1 << 20,
            key_size: 2,
            value_size: 0,
            spaces: 2,
            sectors: 1,
        };
        let _ = Keyer::new(0, 0, opts, seed_box);
    }

    #[test]
    #[should_panic(expected = "at least two keys")]
    fn degenerate_keyspace_is_rejected() {
        let seed_box = Arc::new(SeedBox::new(1));
        let opts = KeyerOptions {
            binary: false,
            count: 1,
            key_size: 8,
            value_size: 0,
            spaces: 1,
            sectors: 1,
        };
        let _ = Keyer::new(0, 0, opts, seed_box);
    }

    #[test]
    fn width_grows_with_keyspace() {
        let seed_box = Arc::new(SeedBox::new(1));
        let mut o = opts(1 << 20, 16, 1, false);
        o.key_size = 16;
        let keyer = Keyer::new(0, 0, o, seed_box);
        assert_eq!(keyer.width, 4);
    }
}
