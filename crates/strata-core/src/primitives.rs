//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Strata substrate.
//!
//! Strata starts with zero data but fixed arithmetic.
//! These primitives are compiled into the binary and are immutable at runtime.
//!
//! ## Primitives
//!
//! 1. **Dimension Table**: the nine Fibonacci indices every substrate divides into.
//! 2. **Golden Stacking Constant**: the odd (hence invertible) 64-bit multiplier
//!    used for dimensional promotion and reduction.
//! 3. **Bounds**: every limit that keeps computation finite.

/// The Fibonacci indices of the nine dimensions of every substrate.
///
/// Division always yields exactly nine parts; the i-th part carries
/// `FIBONACCI_INDICES[i]` as its dimensional index.
pub const FIBONACCI_INDICES: [u8; 9] = [0, 1, 1, 2, 3, 5, 8, 13, 21];

/// Number of dimensions produced by division. Always nine.
pub const DIMENSION_COUNT: usize = 9;

/// Maximum Fibonacci index; power and root exponents are capped here
/// to bound dimensional recursion.
pub const MAX_FIBONACCI_INDEX: u8 = 21;

/// The 64-bit golden-ratio constant (`2^64 / phi`, forced odd).
///
/// Odd values are units of the ring Z/2^64, so multiplication by this
/// constant is a bijection and dimensional stacking stays reversible.
pub const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Multiplicative inverse of [`GOLDEN_GAMMA`] modulo 2^64.
///
/// `GOLDEN_GAMMA.wrapping_mul(GOLDEN_GAMMA_INVERSE) == 1`.
pub const GOLDEN_GAMMA_INVERSE: u64 = 0xF1DE_83E1_9937_733D;

/// Magic bytes for the Strata binary snapshot format header.
pub const MAGIC_BYTES: &[u8; 4] = b"STRA";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

/// Number of registry shards. Shard selection uses the top nibble of the
/// identity, so independent identities never contend on a lock.
pub const SHARD_COUNT: usize = 16;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Default maximum length in bytes for an expression source.
///
/// Sources longer than this are rejected by the gateway before parsing.
/// This prevents memory exhaustion from malicious or malformed input.
pub const MAX_EXPRESSION_SOURCE_BYTES: usize = 4096;

/// Maximum length for parameter names in an expression.
pub const MAX_PARAM_NAME_LENGTH: usize = 64;

/// Maximum number of seed records in a single bulk load.
pub const MAX_SEED_BATCH: usize = 10_000;

/// Hard depth limit for recursive seed-relationship expansion.
pub const MAX_RELATED_DEPTH: usize = 32;

/// Maximum number of nodes a single path search may expand.
///
/// The relationship graph permits cycles; this bound terminates
/// traversals that a visited set alone cannot keep cheap.
pub const MAX_TRAVERSAL_NODES: usize = 100_000;

/// Maximum page size for fetch-log queries.
pub const MAX_FETCH_LOG_PAGE: usize = 1_000;

/// Maximum length of a sanitized adapter error message.
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 200;

/// Default number of consecutive fetch failures before an SRL is blacklisted.
pub const DEFAULT_BLACKLIST_THRESHOLD: u32 = 5;

/// Default adapter timeout for SRL fetches, in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
