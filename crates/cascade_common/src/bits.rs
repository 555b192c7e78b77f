//! Arbitrary-width two's-complement bit vectors with Verilog operator semantics.
//!
//! [`Bits`] is the value type for every signal, parameter, and constant in the
//! runtime. Storage is a little-endian sequence of `u64` words; bits beyond
//! the declared width in the top word are invariantly zero. A value carries a
//! [`Kind`] controlling signed arithmetic and real (IEEE-754 double)
//! reinterpretation. Serial I/O supports bases 2, 8, 10, and 16 plus base 1
//! for reals; the binary form is a 4-byte `(width:30 | kind:2)` header
//! followed by `ceil(width/8)` little-endian value bytes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, Read, Write};
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Not, Sub};

/// Number of value bits packed per storage word.
const BITS_PER_WORD: u32 = 64;

/// The maximum representable width; the binary header reserves 30 bits.
pub const MAX_WIDTH: u32 = (1 << 30) - 1;

/// The interpretation attached to a [`Bits`] value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Kind {
    /// Unsigned two's-complement storage (the default).
    Unsigned,
    /// Signed two's-complement storage; the top bit is the sign.
    Signed,
    /// A 64-bit IEEE-754 double, stored bit-for-bit.
    Real,
}

impl Kind {
    /// The 2-bit code used in the binary header.
    pub fn code(self) -> u32 {
        match self {
            Kind::Unsigned => 0,
            Kind::Signed => 1,
            Kind::Real => 2,
        }
    }

    /// Decodes a 2-bit header code.
    pub fn from_code(code: u32) -> Result<Self, BitsError> {
        match code {
            0 => Ok(Kind::Unsigned),
            1 => Ok(Kind::Signed),
            2 => Ok(Kind::Real),
            c => Err(BitsError::InvalidKind(c as u8)),
        }
    }
}

/// Errors produced by parsing or decoding [`Bits`] values.
#[derive(Debug, thiserror::Error)]
pub enum BitsError {
    /// A digit was not valid for the requested base.
    #[error("invalid digit '{0}' for base {1}")]
    InvalidDigit(char, u32),
    /// The literal or stream token was empty.
    #[error("empty bit-vector literal")]
    Empty,
    /// An unsupported base was requested.
    #[error("unsupported base {0}")]
    InvalidBase(u32),
    /// The binary header carried a kind code outside the defined set.
    #[error("invalid kind code {0} in bit-vector header")]
    InvalidKind(u8),
    /// The binary header carried a zero width.
    #[error("zero width in bit-vector header")]
    ZeroWidth,
    /// The stream ended before the declared payload was complete.
    #[error("truncated bit-vector stream")]
    Truncated,
    /// An underlying I/O error.
    #[error("bit-vector I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An arbitrary-width two's-complement integer (or reinterpreted double).
///
/// Equality and hashing consider only the width and the value bits, not the
/// [`Kind`]; two values with identical bit patterns compare equal regardless
/// of signedness. This is the comparison the dataplane's write-deduplication
/// relies on.
#[derive(Clone, Serialize, Deserialize)]
pub struct Bits {
    width: u32,
    kind: Kind,
    words: Vec<u64>,
}

fn word_count(width: u32) -> usize {
    width.div_ceil(BITS_PER_WORD) as usize
}

impl Bits {
    /// Creates a value of the given width initialized from the low bits of `val`.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or exceeds [`MAX_WIDTH`].
    pub fn new(width: u32, val: u64) -> Self {
        let mut b = Self::zero(width);
        b.words[0] = val;
        b.trim();
        b
    }

    /// Creates an all-zero value of the given width.
    pub fn zero(width: u32) -> Self {
        assert!(width > 0 && width <= MAX_WIDTH, "illegal width {width}");
        Self {
            width,
            kind: Kind::Unsigned,
            words: vec![0; word_count(width)],
        }
    }

    /// Creates a single-bit value from a boolean.
    pub fn from_bool(val: bool) -> Self {
        Self::new(1, val as u64)
    }

    /// Creates a 64-bit real value from a double.
    pub fn real(val: f64) -> Self {
        let mut b = Self::new(64, val.to_bits());
        b.kind = Kind::Real;
        b
    }

    /// Returns the declared width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the value's kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns a copy carrying a different kind over the same bit pattern.
    pub fn with_kind(&self, kind: Kind) -> Self {
        let mut b = self.clone();
        b.kind = kind;
        b
    }

    /// Returns the bit at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.width()`.
    pub fn get(&self, i: u32) -> bool {
        assert!(i < self.width, "bit index {i} out of range for width {}", self.width);
        (self.words[(i / BITS_PER_WORD) as usize] >> (i % BITS_PER_WORD)) & 1 != 0
    }

    /// Sets the bit at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.width()`.
    pub fn set(&mut self, i: u32, val: bool) {
        assert!(i < self.width, "bit index {i} out of range for width {}", self.width);
        let w = (i / BITS_PER_WORD) as usize;
        let mask = 1u64 << (i % BITS_PER_WORD);
        if val {
            self.words[w] |= mask;
        } else {
            self.words[w] &= !mask;
        }
    }

    /// Inverts the bit at position `i`.
    pub fn flip(&mut self, i: u32) {
        let cur = self.get(i);
        self.set(i, !cur);
    }

    /// Returns `true` if any bit is set.
    pub fn to_bool(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Returns `true` if every bit is zero.
    pub fn is_zero(&self) -> bool {
        !self.to_bool()
    }

    /// Returns the low 64 bits of the value.
    pub fn to_u64(&self) -> u64 {
        self.words[0]
    }

    /// Returns the value as a signed 64-bit integer, sign-extending from the
    /// declared width when the kind is signed.
    pub fn to_i64(&self) -> i64 {
        let raw = self.words[0];
        if self.kind == Kind::Signed && self.sign_bit() {
            if self.width >= 64 {
                raw as i64
            } else {
                (raw | (!0u64 << self.width)) as i64
            }
        } else {
            raw as i64
        }
    }

    /// Converts the value to a double.
    ///
    /// Reals are reinterpreted bit-for-bit; signed values convert through
    /// their two's-complement magnitude; unsigned values convert directly.
    pub fn to_double(&self) -> f64 {
        match self.kind {
            Kind::Real => f64::from_bits(self.words[0]),
            Kind::Signed if self.sign_bit() => {
                let mag = self.negated();
                -mag.magnitude_to_double()
            }
            _ => self.magnitude_to_double(),
        }
    }

    fn magnitude_to_double(&self) -> f64 {
        let mut val = 0.0f64;
        for &w in self.words.iter().rev() {
            val = val * 18446744073709551616.0 + w as f64;
        }
        val
    }

    /// Creates a value from a double. The result is a real of width 64.
    pub fn from_double(val: f64) -> Self {
        Self::real(val)
    }

    /// Rounds a real to a signed 64-bit integer value (32-bit width is common
    /// for `integer` contexts; callers resize as needed).
    pub fn real_to_int(&self) -> Self {
        let v = self.to_double().round() as i64;
        let mut b = Self::new(64, v as u64);
        b.kind = Kind::Signed;
        b
    }

    /// Returns the sign bit (the bit at `width - 1`).
    pub fn sign_bit(&self) -> bool {
        self.get(self.width - 1)
    }

    /// Zeroes every bit above the declared width in the top storage word.
    fn trim(&mut self) {
        let rem = self.width % BITS_PER_WORD;
        if rem != 0 {
            let last = self.words.len() - 1;
            self.words[last] &= (1u64 << rem) - 1;
        }
    }

    /// Returns a copy resized to `width`.
    ///
    /// Narrowing truncates high bits. Widening extends with the sign bit for
    /// signed values and zeros otherwise.
    pub fn resize(&self, width: u32) -> Self {
        self.extend_with(width, self.kind == Kind::Signed && self.sign_bit())
    }

    fn extend_with(&self, width: u32, fill: bool) -> Self {
        assert!(width > 0 && width <= MAX_WIDTH, "illegal width {width}");
        let mut out = Self::zero(width);
        out.kind = self.kind;
        if fill {
            for w in out.words.iter_mut() {
                *w = !0;
            }
        }
        let copy_bits = self.width.min(width);
        let copy_words = (copy_bits / BITS_PER_WORD) as usize;
        out.words[..copy_words].copy_from_slice(&self.words[..copy_words]);
        for i in (copy_words as u32 * BITS_PER_WORD)..copy_bits {
            let bit = self.get(i);
            out.set(i, bit);
        }
        out.trim();
        out
    }

    /// Two's-complement negation at the declared width.
    pub fn negated(&self) -> Self {
        if self.kind == Kind::Real {
            return Self::real(-self.to_double());
        }
        let mut out = self.clone();
        for w in out.words.iter_mut() {
            *w = !*w;
        }
        out.trim();
        let one = Self::new(self.width, 1);
        out.add_in_place(&one);
        out
    }

    fn add_in_place(&mut self, rhs: &Bits) {
        debug_assert_eq!(self.words.len(), rhs.words.len());
        let mut carry = 0u64;
        for (a, &b) in self.words.iter_mut().zip(rhs.words.iter()) {
            let (s1, c1) = a.overflowing_add(b);
            let (s2, c2) = s1.overflowing_add(carry);
            *a = s2;
            carry = c1 as u64 + c2 as u64;
        }
        self.trim();
    }

    fn cmp_magnitude(&self, rhs: &Bits) -> Ordering {
        debug_assert_eq!(self.words.len(), rhs.words.len());
        for (&a, &b) in self.words.iter().rev().zip(rhs.words.iter().rev()) {
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Verilog relational comparison.
    ///
    /// Reals compare as doubles. Otherwise the narrower operand is extended
    /// to the wider operand's width (sign-extended only when both operands
    /// are signed) and the two are compared, consulting the sign bit when
    /// both are signed.
    pub fn compare(&self, rhs: &Bits) -> Ordering {
        if self.kind == Kind::Real || rhs.kind == Kind::Real {
            return self
                .to_double()
                .partial_cmp(&rhs.to_double())
                .unwrap_or(Ordering::Equal);
        }
        let signed = self.kind == Kind::Signed && rhs.kind == Kind::Signed;
        let w = self.width.max(rhs.width);
        let a = self.extend_with(w, signed && self.sign_bit());
        let b = rhs.extend_with(w, signed && rhs.sign_bit());
        if signed {
            match (a.sign_bit(), b.sign_bit()) {
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                _ => {}
            }
        }
        a.cmp_magnitude(&b)
    }

    /// Verilog `==` over possibly differently-sized operands.
    pub fn logical_eq(&self, rhs: &Bits) -> bool {
        self.compare(rhs) == Ordering::Equal
    }

    // ========================================================================
    // Bitwise operations (equal widths required)
    // ========================================================================

    /// Bitwise XNOR. Re-applies the width invariant.
    pub fn xnor(&self, rhs: &Bits) -> Self {
        let mut out = self ^ rhs;
        for w in out.words.iter_mut() {
            *w = !*w;
        }
        out.trim();
        out
    }

    /// Logical/arithmetic shift left by `amount` bits.
    pub fn shl(&self, amount: usize) -> Self {
        let mut out = Self::zero(self.width);
        out.kind = self.kind;
        if amount >= self.width as usize {
            return out;
        }
        let word_shift = amount / BITS_PER_WORD as usize;
        let bit_shift = (amount % BITS_PER_WORD as usize) as u32;
        let n = self.words.len();
        for i in (word_shift..n).rev() {
            let mut w = self.words[i - word_shift] << bit_shift;
            if bit_shift > 0 && i > word_shift {
                w |= self.words[i - word_shift - 1] >> (BITS_PER_WORD - bit_shift);
            }
            out.words[i] = w;
        }
        out.trim();
        out
    }

    /// Logical shift right by `amount` bits.
    pub fn shr(&self, amount: usize) -> Self {
        let mut out = Self::zero(self.width);
        out.kind = self.kind;
        if amount >= self.width as usize {
            return out;
        }
        let word_shift = amount / BITS_PER_WORD as usize;
        let bit_shift = (amount % BITS_PER_WORD as usize) as u32;
        let n = self.words.len();
        for i in 0..(n - word_shift) {
            let mut w = self.words[i + word_shift] >> bit_shift;
            if bit_shift > 0 && i + word_shift + 1 < n {
                w |= self.words[i + word_shift + 1] << (BITS_PER_WORD - bit_shift);
            }
            out.words[i] = w;
        }
        out
    }

    /// Arithmetic shift right.
    ///
    /// The sign bit is replicated only when the kind is signed and the top
    /// bit is set; otherwise this is a logical shift.
    pub fn sar(&self, amount: usize) -> Self {
        if self.kind != Kind::Signed || !self.sign_bit() {
            return self.shr(amount);
        }
        let mut out = self.shr(amount);
        let start = self.width.saturating_sub(amount.min(self.width as usize) as u32);
        for i in start..self.width {
            out.set(i, true);
        }
        out
    }

    // ========================================================================
    // Arithmetic (equal widths; wraps modulo 2^width)
    // ========================================================================

    fn promote_real(&self, rhs: &Bits) -> Option<(f64, f64)> {
        if self.kind == Kind::Real || rhs.kind == Kind::Real {
            Some((self.to_double(), rhs.to_double()))
        } else {
            None
        }
    }

    fn split_signed(&self) -> (bool, Bits) {
        if self.kind == Kind::Signed && self.sign_bit() {
            (true, self.negated())
        } else {
            (false, self.clone())
        }
    }

    /// Division, truncating toward zero. Division by zero yields zero.
    pub fn div(&self, rhs: &Bits) -> Self {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Self::real(a / b);
        }
        let (sa, ma) = self.split_signed();
        let (sb, mb) = rhs.split_signed();
        let (q, _) = ma.div_rem_magnitude(&mb);
        let mut out = if sa != sb { q.negated() } else { q };
        out.kind = self.kind;
        out
    }

    /// Modulus; the result takes the dividend's sign. Modulus by zero yields zero.
    pub fn rem(&self, rhs: &Bits) -> Self {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Self::real(a % b);
        }
        let (sa, ma) = self.split_signed();
        let (_, mb) = rhs.split_signed();
        let (_, r) = ma.div_rem_magnitude(&mb);
        let mut out = if sa { r.negated() } else { r };
        out.kind = self.kind;
        out
    }

    fn div_rem_magnitude(&self, rhs: &Bits) -> (Bits, Bits) {
        let w = self.width;
        if rhs.is_zero() {
            return (Bits::zero(w), Bits::zero(w));
        }
        let divisor = rhs.extend_with(w.max(rhs.width), false);
        let mut quot = Bits::zero(w);
        let mut rem = Bits::zero(divisor.width);
        for i in (0..w).rev() {
            rem = rem.shl(1);
            rem.set(0, self.get(i));
            if rem.cmp_magnitude(&divisor) != Ordering::Less {
                let mut neg = divisor.clone();
                for word in neg.words.iter_mut() {
                    *word = !*word;
                }
                neg.trim();
                neg.add_in_place(&Bits::new(divisor.width, 1));
                rem.add_in_place(&neg);
                quot.set(i, true);
            }
        }
        (quot, rem.resize(w))
    }

    /// Exponentiation modulo `2^width`, by repeated squaring.
    ///
    /// A negative signed exponent follows the Verilog table: bases of 1
    /// yield 1, -1 alternates by exponent parity, and all other bases
    /// collapse to zero.
    pub fn pow(&self, rhs: &Bits) -> Self {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Self::real(a.powf(b));
        }
        if rhs.kind == Kind::Signed && rhs.sign_bit() {
            let one = Bits::new(self.width, 1).with_kind(self.kind);
            if self.logical_eq(&one) {
                return one;
            }
            if self.kind == Kind::Signed && self.negated().logical_eq(&one) {
                let odd = rhs.get(0);
                return if odd { self.clone() } else { one };
            }
            let mut z = Bits::zero(self.width);
            z.kind = self.kind;
            return z;
        }
        let mut result = Bits::new(self.width, 1);
        result.kind = self.kind;
        let mut base = self.clone();
        for i in 0..rhs.width {
            if rhs.get(i) {
                result = &result * &base;
            }
            base = &base * &base;
        }
        result
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    /// AND reduction: `true` iff every bit is set.
    pub fn reduce_and(&self) -> bool {
        (0..self.width).all(|i| self.get(i))
    }

    /// OR reduction: `true` iff any bit is set.
    pub fn reduce_or(&self) -> bool {
        self.to_bool()
    }

    /// XOR reduction: the parity of the set bits.
    pub fn reduce_xor(&self) -> bool {
        self.words.iter().map(|w| w.count_ones()).sum::<u32>() % 2 == 1
    }

    /// NAND reduction.
    pub fn reduce_nand(&self) -> bool {
        !self.reduce_and()
    }

    /// NOR reduction.
    pub fn reduce_nor(&self) -> bool {
        !self.reduce_or()
    }

    /// XNOR reduction.
    pub fn reduce_xnor(&self) -> bool {
        !self.reduce_xor()
    }

    // ========================================================================
    // Concatenation, slicing, part assignment
    // ========================================================================

    /// Appends `rhs` below this value: the receiver is extended by
    /// `rhs.width()` bits, shifted left by that amount, and `rhs` is OR-ed
    /// into the low positions.
    pub fn concat(&mut self, rhs: &Bits) {
        let new_width = self.width + rhs.width;
        let mut out = self.extend_with(new_width, false).shl(rhs.width as usize);
        let low = rhs.extend_with(new_width, false);
        for (a, &b) in out.words.iter_mut().zip(low.words.iter()) {
            *a |= b;
        }
        out.kind = Kind::Unsigned;
        *self = out;
    }

    /// Extracts the bit range `[msb:lsb]` as a new unsigned value.
    ///
    /// # Panics
    ///
    /// Panics if `msb < lsb` or `msb >= self.width()`.
    pub fn slice(&self, msb: u32, lsb: u32) -> Self {
        assert!(msb >= lsb, "slice [{msb}:{lsb}] is reversed");
        assert!(msb < self.width, "slice [{msb}:{lsb}] exceeds width {}", self.width);
        let mut out = self.shr(lsb as usize);
        out.kind = Kind::Unsigned;
        out.resize(msb - lsb + 1)
    }

    /// Writes `src` into the bit range `[msb:lsb]`, preserving bits outside
    /// the range. Source bits beyond the range width are ignored; a narrow
    /// source zero-fills the high positions of the range.
    pub fn assign_range(&mut self, msb: u32, lsb: u32, src: &Bits) {
        assert!(msb >= lsb && msb < self.width, "range [{msb}:{lsb}] out of bounds");
        for i in 0..=(msb - lsb) {
            let bit = if i < src.width { src.get(i) } else { false };
            self.set(lsb + i, bit);
        }
    }

    // ========================================================================
    // Serial I/O
    // ========================================================================

    /// Parses a value from text in the given base.
    ///
    /// Base 10 accepts an optional leading `-` and produces a signed value
    /// when negative; base 1 parses an IEEE double; bases 2, 8, and 16 grow
    /// the width by 1, 3, or 4 bits per digit. Underscores are skipped.
    pub fn parse_radix(text: &str, base: u32) -> Result<Self, BitsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BitsError::Empty);
        }
        match base {
            1 => {
                let val: f64 = text
                    .parse()
                    .map_err(|_| BitsError::InvalidDigit(text.chars().next().unwrap(), 1))?;
                Ok(Self::real(val))
            }
            10 => Self::parse_decimal(text),
            2 | 8 | 16 => Self::parse_pow2(text, base),
            b => Err(BitsError::InvalidBase(b)),
        }
    }

    fn parse_decimal(text: &str) -> Result<Self, BitsError> {
        let (neg, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let mut words = vec![0u64];
        let mut any = false;
        for c in digits.chars() {
            if c == '_' {
                continue;
            }
            let d = c.to_digit(10).ok_or(BitsError::InvalidDigit(c, 10))? as u64;
            any = true;
            let mut carry = d as u128;
            for w in words.iter_mut() {
                let v = (*w as u128) * 10 + carry;
                *w = v as u64;
                carry = v >> 64;
            }
            if carry != 0 {
                words.push(carry as u64);
            }
        }
        if !any {
            return Err(BitsError::Empty);
        }
        let used = used_bits(&words);
        let width = if neg { used + 1 } else { used.max(1) };
        let mut out = Self::zero(width);
        let n = out.words.len().min(words.len());
        out.words[..n].copy_from_slice(&words[..n]);
        out.trim();
        if neg {
            out = out.negated();
            out.kind = Kind::Signed;
        }
        Ok(out)
    }

    fn parse_pow2(text: &str, base: u32) -> Result<Self, BitsError> {
        let step = match base {
            2 => 1,
            8 => 3,
            16 => 4,
            _ => unreachable!(),
        };
        let mut out = Bits::zero(1);
        let mut any = false;
        for c in text.chars() {
            if c == '_' {
                continue;
            }
            let d = c.to_digit(base).ok_or(BitsError::InvalidDigit(c, base))? as u64;
            any = true;
            let grown = out.extend_with(out.width + step, false).shl(step as usize);
            out = grown;
            out.words[0] |= d;
        }
        if !any {
            return Err(BitsError::Empty);
        }
        // Drop the seed bit introduced before the first digit.
        Ok(out.slice(out.width - 2, 0))
    }

    /// Formats the value in the given base.
    ///
    /// Base 10 prints a signed decimal for signed values (complementing a
    /// negative value before printing); base 1 prints the double; bases 2,
    /// 8, and 16 print from the most significant digit with no leading
    /// zeros beyond the first digit.
    pub fn format_radix(&self, base: u32) -> Result<String, BitsError> {
        match base {
            1 => Ok(format!("{}", self.to_double())),
            10 => Ok(self.format_decimal()),
            2 | 8 | 16 => Ok(self.format_pow2(base)),
            b => Err(BitsError::InvalidBase(b)),
        }
    }

    fn format_decimal(&self) -> String {
        if self.kind == Kind::Real {
            return format!("{}", self.to_double());
        }
        let (neg, mag) = self.split_signed();
        // Repeated doubling from the most significant bit down.
        let mut digits = vec![0u8];
        for i in (0..mag.width).rev() {
            let mut carry = mag.get(i) as u8;
            for d in digits.iter_mut() {
                let v = *d * 2 + carry;
                *d = v % 10;
                carry = v / 10;
            }
            if carry > 0 {
                digits.push(carry);
            }
        }
        let mut s = String::new();
        if neg {
            s.push('-');
        }
        for &d in digits.iter().rev() {
            s.push((b'0' + d) as char);
        }
        s
    }

    fn format_pow2(&self, base: u32) -> String {
        let step = match base {
            2 => 1,
            8 => 3,
            16 => 4,
            _ => unreachable!(),
        };
        let ndigits = self.width.div_ceil(step);
        let mut s = String::new();
        let mut leading = true;
        for i in (0..ndigits).rev() {
            let lsb = i * step;
            let mut d = 0u32;
            for b in 0..step {
                let idx = lsb + b;
                if idx < self.width && self.get(idx) {
                    d |= 1 << b;
                }
            }
            if d == 0 && leading && i != 0 {
                continue;
            }
            leading = false;
            s.push(char::from_digit(d, base).unwrap());
        }
        s
    }

    /// Reads one whitespace-delimited token from the stream and parses it in
    /// the given base, replacing this value.
    pub fn read<R: BufRead + ?Sized>(&mut self, r: &mut R, base: u32) -> Result<(), BitsError> {
        let token = read_token(r)?;
        *self = Self::parse_radix(&token, base)?;
        Ok(())
    }

    /// Writes the value to the stream in the given base.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W, base: u32) -> Result<(), BitsError> {
        let s = self.format_radix(base)?;
        w.write_all(s.as_bytes())?;
        Ok(())
    }

    // ========================================================================
    // Block I/O
    // ========================================================================

    /// Reads the `n`-th `B`-sized word of the value. Positions beyond the
    /// width read as zero.
    pub fn read_word<B: WordType>(&self, n: usize) -> B {
        let lsb = n as u64 * B::BITS as u64;
        if lsb >= self.width as u64 {
            return B::from_u64(0);
        }
        let word = (lsb / BITS_PER_WORD as u64) as usize;
        let off = (lsb % BITS_PER_WORD as u64) as u32;
        let mut v = self.words[word] >> off;
        if off > 0 && word + 1 < self.words.len() {
            v |= self.words[word + 1] << (BITS_PER_WORD - off);
        }
        if B::BITS < 64 {
            v &= (1u64 << B::BITS) - 1;
        }
        B::from_u64(v)
    }

    /// Writes the `n`-th `B`-sized word of the value, re-applying the width
    /// invariant. Positions beyond the width are ignored.
    pub fn write_word<B: WordType>(&mut self, n: usize, val: B) {
        let lsb = n as u64 * B::BITS as u64;
        if lsb >= self.width as u64 {
            return;
        }
        let v = val.to_u64();
        for b in 0..B::BITS {
            let idx = lsb + b as u64;
            if idx >= self.width as u64 {
                break;
            }
            self.set(idx as u32, (v >> b) & 1 != 0);
        }
    }

    // ========================================================================
    // Binary codec
    // ========================================================================

    /// Serializes the value: a 4-byte little-endian `(width:30 | kind:2)`
    /// header followed by `ceil(width/8)` little-endian value bytes.
    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let header = self.width | (self.kind.code() << 30);
        w.write_all(&header.to_le_bytes())?;
        let nbytes = (self.width as usize).div_ceil(8);
        for i in 0..nbytes {
            let byte = (self.words[i / 8] >> (8 * (i % 8))) as u8;
            w.write_all(&[byte])?;
        }
        Ok(())
    }

    /// Deserializes a value previously written by [`serialize`](Self::serialize).
    pub fn deserialize<R: Read + ?Sized>(r: &mut R) -> Result<Self, BitsError> {
        let mut header = [0u8; 4];
        read_exact(r, &mut header)?;
        let header = u32::from_le_bytes(header);
        let width = header & MAX_WIDTH;
        if width == 0 {
            return Err(BitsError::ZeroWidth);
        }
        let kind = Kind::from_code(header >> 30)?;
        let mut out = Self::zero(width);
        out.kind = kind;
        let nbytes = (width as usize).div_ceil(8);
        for i in 0..nbytes {
            let mut byte = [0u8; 1];
            read_exact(r, &mut byte)?;
            out.words[i / 8] |= (byte[0] as u64) << (8 * (i % 8));
        }
        out.trim();
        Ok(out)
    }
}

fn read_exact<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), BitsError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(BitsError::Truncated),
        Err(e) => Err(BitsError::Io(e)),
    }
}

fn read_token<R: BufRead + ?Sized>(r: &mut R) -> Result<String, BitsError> {
    let mut token = String::new();
    loop {
        let buf = r.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let mut used = 0;
        let mut done = false;
        for &b in buf {
            if (b as char).is_whitespace() {
                used += 1;
                if !token.is_empty() {
                    done = true;
                    break;
                }
            } else {
                token.push(b as char);
                used += 1;
            }
        }
        r.consume(used);
        if done {
            break;
        }
    }
    if token.is_empty() {
        Err(BitsError::Empty)
    } else {
        Ok(token)
    }
}

fn used_bits(words: &[u64]) -> u32 {
    for (i, &w) in words.iter().enumerate().rev() {
        if w != 0 {
            return i as u32 * BITS_PER_WORD + (BITS_PER_WORD - w.leading_zeros());
        }
    }
    1
}

/// Primitive word types usable with [`Bits::read_word`] and [`Bits::write_word`].
pub trait WordType: Copy {
    /// The width of this word type in bits.
    const BITS: u32;
    /// Constructs a word from the low bits of a `u64`.
    fn from_u64(val: u64) -> Self;
    /// Widens the word to a `u64`.
    fn to_u64(self) -> u64;
}

macro_rules! impl_word_type {
    ($($ty:ty),*) => {
        $(impl WordType for $ty {
            const BITS: u32 = <$ty>::BITS;
            fn from_u64(val: u64) -> Self {
                val as $ty
            }
            fn to_u64(self) -> u64 {
                self as u64
            }
        })*
    };
}

impl_word_type!(u8, u16, u32, u64);

impl PartialEq for Bits {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.words == other.words
    }
}

impl Eq for Bits {}

impl Hash for Bits {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.width.hash(state);
        self.words.hash(state);
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_decimal())
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bits({}'{})", self.width, self.format_decimal())
    }
}

impl BitAnd for &Bits {
    type Output = Bits;

    fn bitand(self, rhs: Self) -> Bits {
        assert_eq!(self.width, rhs.width, "Bits width mismatch in AND");
        let mut out = self.clone();
        for (a, &b) in out.words.iter_mut().zip(rhs.words.iter()) {
            *a &= b;
        }
        out
    }
}

impl BitOr for &Bits {
    type Output = Bits;

    fn bitor(self, rhs: Self) -> Bits {
        assert_eq!(self.width, rhs.width, "Bits width mismatch in OR");
        let mut out = self.clone();
        for (a, &b) in out.words.iter_mut().zip(rhs.words.iter()) {
            *a |= b;
        }
        out
    }
}

impl BitXor for &Bits {
    type Output = Bits;

    fn bitxor(self, rhs: Self) -> Bits {
        assert_eq!(self.width, rhs.width, "Bits width mismatch in XOR");
        let mut out = self.clone();
        for (a, &b) in out.words.iter_mut().zip(rhs.words.iter()) {
            *a ^= b;
        }
        out
    }
}

impl Not for &Bits {
    type Output = Bits;

    fn not(self) -> Bits {
        let mut out = self.clone();
        for w in out.words.iter_mut() {
            *w = !*w;
        }
        out.trim();
        out
    }
}

impl Add for &Bits {
    type Output = Bits;

    fn add(self, rhs: Self) -> Bits {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Bits::real(a + b);
        }
        assert_eq!(self.width, rhs.width, "Bits width mismatch in ADD");
        let mut out = self.clone();
        out.add_in_place(rhs);
        out
    }
}

impl Sub for &Bits {
    type Output = Bits;

    fn sub(self, rhs: Self) -> Bits {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Bits::real(a - b);
        }
        assert_eq!(self.width, rhs.width, "Bits width mismatch in SUB");
        let mut out = self.clone();
        out.add_in_place(&rhs.negated());
        out
    }
}

impl Mul for &Bits {
    type Output = Bits;

    fn mul(self, rhs: Self) -> Bits {
        if let Some((a, b)) = self.promote_real(rhs) {
            return Bits::real(a * b);
        }
        assert_eq!(self.width, rhs.width, "Bits width mismatch in MUL");
        let n = self.words.len();
        let mut out = Bits::zero(self.width);
        out.kind = self.kind;
        for i in 0..n {
            let mut carry: u128 = 0;
            for j in 0..(n - i) {
                let cur = out.words[i + j] as u128
                    + (self.words[i] as u128) * (rhs.words[j] as u128)
                    + carry;
                out.words[i + j] = cur as u64;
                carry = cur >> 64;
            }
        }
        out.trim();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_excess() {
        let b = Bits::new(4, 0xFF);
        assert_eq!(b.to_u64(), 0xF);
    }

    #[test]
    fn add_wraps_modulo_width() {
        let a = Bits::new(4, 0xF);
        let b = Bits::new(4, 0x1);
        let sum = &a + &b;
        assert_eq!(sum.to_u64(), 0x0);
        assert_eq!(sum.width(), 4);
    }

    #[test]
    fn signed_comparison_consults_sign_bit() {
        let a = Bits::new(4, 0x8).with_kind(Kind::Signed);
        let z = Bits::new(4, 0x0).with_kind(Kind::Signed);
        assert_eq!(a.compare(&z), Ordering::Less);
        assert_eq!(z.compare(&a), Ordering::Greater);
    }

    #[test]
    fn unsigned_comparison_ignores_top_bit() {
        let a = Bits::new(4, 0x8);
        let z = Bits::new(4, 0x0);
        assert_eq!(a.compare(&z), Ordering::Greater);
    }

    #[test]
    fn comparison_extends_narrower_operand() {
        let a = Bits::new(4, 9);
        let b = Bits::new(8, 9);
        assert!(a.logical_eq(&b));
        let c = Bits::new(8, 200);
        assert_eq!(a.compare(&c), Ordering::Less);
    }

    #[test]
    fn negation_is_twos_complement() {
        let a = Bits::new(4, 3).with_kind(Kind::Signed);
        let n = a.negated();
        assert_eq!(n.to_u64(), 0xD);
        assert_eq!(n.to_i64(), -3);
    }

    #[test]
    fn signed_division_truncates_toward_zero() {
        let a = Bits::new(8, (-7i64 as u64) & 0xFF).with_kind(Kind::Signed);
        let b = Bits::new(8, 2).with_kind(Kind::Signed);
        let q = a.div(&b);
        assert_eq!(q.to_i64(), -3);
        let r = a.rem(&b);
        assert_eq!(r.to_i64(), -1);
    }

    #[test]
    fn division_by_zero_does_not_panic() {
        let a = Bits::new(8, 42);
        let z = Bits::new(8, 0);
        let _ = a.div(&z);
        let _ = a.rem(&z);
    }

    #[test]
    fn multiplication_across_words() {
        let a = Bits::new(128, u64::MAX);
        let b = Bits::new(128, 2);
        let p = &a * &b;
        assert_eq!(p.read_word::<u64>(0), u64::MAX - 1);
        assert_eq!(p.read_word::<u64>(1), 1);
    }

    #[test]
    fn pow_wraps() {
        let a = Bits::new(8, 3);
        let b = Bits::new(8, 5);
        assert_eq!(a.pow(&b).to_u64(), 243 % 256);
    }

    #[test]
    fn pow_negative_exponent_collapses() {
        let base = Bits::new(8, 2).with_kind(Kind::Signed);
        let exp = Bits::new(8, (-1i64 as u64) & 0xFF).with_kind(Kind::Signed);
        assert!(base.pow(&exp).is_zero());
    }

    #[test]
    fn xnor_reapplies_trim() {
        let a = Bits::new(4, 0b1010);
        let b = Bits::new(4, 0b1010);
        let r = a.xnor(&b);
        assert_eq!(r.to_u64(), 0xF);
        assert_eq!(r.width(), 4);
    }

    #[test]
    fn not_reapplies_trim() {
        let a = Bits::new(4, 0);
        let r = !&a;
        assert_eq!(r.to_u64(), 0xF);
    }

    #[test]
    fn arithmetic_shift_right_replicates_sign() {
        let a = Bits::new(4, 0b1000).with_kind(Kind::Signed);
        assert_eq!(a.sar(1).to_u64(), 0b1100);
        let u = Bits::new(4, 0b1000);
        assert_eq!(u.sar(1).to_u64(), 0b0100);
    }

    #[test]
    fn shifts_across_word_boundaries() {
        let a = Bits::new(100, 1);
        let b = a.shl(80);
        assert!(b.get(80));
        assert_eq!(b.shr(80).to_u64(), 1);
    }

    #[test]
    fn concat_places_receiver_high() {
        let mut a = Bits::new(4, 0xA);
        let b = Bits::new(4, 0x5);
        a.concat(&b);
        assert_eq!(a.width(), 8);
        assert_eq!(a.to_u64(), 0xA5);
    }

    #[test]
    fn slice_and_assign_range() {
        let v = Bits::new(8, 0xA5);
        assert_eq!(v.slice(7, 4).to_u64(), 0xA);
        assert_eq!(v.slice(3, 0).to_u64(), 0x5);
        assert_eq!(v.slice(4, 4).to_u64(), 0x0);

        let mut w = Bits::new(8, 0xFF);
        w.assign_range(7, 4, &Bits::new(4, 0x3));
        assert_eq!(w.to_u64(), 0x3F);
    }

    #[test]
    fn reductions() {
        let a = Bits::new(4, 0xF);
        assert!(a.reduce_and());
        assert!(!a.reduce_nand());
        let b = Bits::new(4, 0b0110);
        assert!(!b.reduce_xor());
        assert!(b.reduce_xnor());
        assert!(b.reduce_or());
        assert!(Bits::new(4, 0).reduce_nor());
    }

    #[test]
    fn decimal_format_unsigned() {
        let b = Bits::new(16, 12345);
        assert_eq!(b.format_radix(10).unwrap(), "12345");
    }

    #[test]
    fn decimal_format_negative_signed() {
        let b = Bits::new(8, (-42i64 as u64) & 0xFF).with_kind(Kind::Signed);
        assert_eq!(b.format_radix(10).unwrap(), "-42");
    }

    #[test]
    fn decimal_parse_roundtrip() {
        let b = Bits::parse_radix("98765432109876543210", 10).unwrap();
        assert_eq!(b.format_radix(10).unwrap(), "98765432109876543210");
    }

    #[test]
    fn decimal_parse_negative() {
        let b = Bits::parse_radix("-5", 10).unwrap();
        assert_eq!(b.kind(), Kind::Signed);
        assert_eq!(b.to_i64(), -5);
    }

    #[test]
    fn pow2_parse_grows_per_digit() {
        let b = Bits::parse_radix("ff", 16).unwrap();
        assert_eq!(b.width(), 8);
        assert_eq!(b.to_u64(), 0xFF);
        let o = Bits::parse_radix("17", 8).unwrap();
        assert_eq!(o.width(), 6);
        assert_eq!(o.to_u64(), 0o17);
        let bin = Bits::parse_radix("1010", 2).unwrap();
        assert_eq!(bin.width(), 4);
        assert_eq!(bin.to_u64(), 0b1010);
    }

    #[test]
    fn pow2_format() {
        let b = Bits::new(8, 0xA5);
        assert_eq!(b.format_radix(16).unwrap(), "a5");
        assert_eq!(b.format_radix(2).unwrap(), "10100101");
        assert_eq!(Bits::new(8, 0).format_radix(16).unwrap(), "0");
    }

    #[test]
    fn real_roundtrip() {
        let r = Bits::real(3.25);
        assert_eq!(r.width(), 64);
        assert_eq!(r.kind(), Kind::Real);
        assert_eq!(r.to_double(), 3.25);
        let parsed = Bits::parse_radix("3.25", 1).unwrap();
        assert_eq!(parsed.to_double(), 3.25);
    }

    #[test]
    fn real_promotes_arithmetic() {
        let a = Bits::real(1.5);
        let b = Bits::new(8, 2);
        let sum = &a + &b;
        assert_eq!(sum.kind(), Kind::Real);
        assert_eq!(sum.to_double(), 3.5);
    }

    #[test]
    fn serialize_header_layout() {
        let b = Bits::new(12, 0xABC).with_kind(Kind::Signed);
        let mut buf = Vec::new();
        b.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 2);
        let header = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(header & MAX_WIDTH, 12);
        assert_eq!(header >> 30, 1);
        assert_eq!(buf[4], 0xBC);
        assert_eq!(buf[5], 0x0A);
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let vals = [
            Bits::new(1, 1),
            Bits::new(4, 0xA),
            Bits::new(64, u64::MAX),
            Bits::new(100, 12345).with_kind(Kind::Signed),
            Bits::real(-2.5),
        ];
        for v in &vals {
            let mut buf = Vec::new();
            v.serialize(&mut buf).unwrap();
            let back = Bits::deserialize(&mut buf.as_slice()).unwrap();
            assert_eq!(&back, v);
            assert_eq!(back.kind(), v.kind());
        }
    }

    #[test]
    fn deserialize_truncated_stream() {
        let b = Bits::new(32, 7);
        let mut buf = Vec::new();
        b.serialize(&mut buf).unwrap();
        buf.truncate(5);
        assert!(matches!(
            Bits::deserialize(&mut buf.as_slice()),
            Err(BitsError::Truncated)
        ));
    }

    #[test]
    fn read_token_from_stream() {
        let mut input = io::Cursor::new("  42 99");
        let mut b = Bits::zero(1);
        b.read(&mut input, 10).unwrap();
        assert_eq!(b.to_u64(), 42);
        b.read(&mut input, 10).unwrap();
        assert_eq!(b.to_u64(), 99);
    }

    #[test]
    fn word_io_roundtrip() {
        let mut b = Bits::zero(48);
        b.write_word::<u16>(1, 0xBEEF);
        assert_eq!(b.read_word::<u16>(1), 0xBEEF);
        assert_eq!(b.read_word::<u16>(0), 0);
        assert_eq!(b.read_word::<u32>(0), 0xBEEF_0000);
        // Writes past the width are dropped.
        b.write_word::<u32>(5, 0xFFFF_FFFF);
        assert_eq!(b.read_word::<u32>(5), 0);
    }

    #[test]
    fn word_write_reapplies_trim() {
        let mut b = Bits::zero(12);
        b.write_word::<u16>(0, 0xFFFF);
        assert_eq!(b.to_u64(), 0xFFF);
    }

    #[test]
    fn resize_sign_extends_signed() {
        let a = Bits::new(4, 0x8).with_kind(Kind::Signed);
        let wide = a.resize(8);
        assert_eq!(wide.to_u64(), 0xF8);
        let u = Bits::new(4, 0x8);
        assert_eq!(u.resize(8).to_u64(), 0x08);
    }

    #[test]
    fn equality_ignores_kind() {
        let a = Bits::new(4, 0x8);
        let b = Bits::new(4, 0x8).with_kind(Kind::Signed);
        assert_eq!(a, b);
    }

    #[test]
    fn flip_toggles() {
        let mut b = Bits::new(4, 0);
        b.flip(0);
        assert_eq!(b.to_u64(), 1);
        b.flip(0);
        assert_eq!(b.to_u64(), 0);
    }

    #[test]
    fn serde_roundtrip() {
        let b = Bits::new(20, 0xABCDE).with_kind(Kind::Signed);
        let json = serde_json::to_string(&b).unwrap();
        let back: Bits = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
        assert_eq!(back.kind(), Kind::Signed);
    }
}
