// Emergency reserve in sats. The confirmed, unreserved wallet balance must not drop below this
// amount after a bump, unless the operator overrides it with `yolo`.
pub const EMERGENCY_RESERVE_SATS: u64 = 25_000;

// Maximum number of times the builder adds another wallet input after a shortfall.
pub const MAX_BUILD_RETRIES: u32 = 3;

// Segwit marker and flag bytes, only present once any input carries a witness.
pub const SEGWIT_MARKER_FLAG_WEIGHT: u64 = 2;

// Outpoint and sequence of an input, excluding the script_sig.
pub const BASE_INPUT_WEIGHT: u64 = (32 + 4 + 4) * 4;

// A single length byte for an empty script_sig.
pub const EMPTY_SCRIPT_SIG_WEIGHT: u64 = 4;

// number_of_witness_elements + sig_length + sig + pubkey_length + pubkey
pub const P2WPKH_WITNESS_WEIGHT: u64 = 1 + 1 + 73 + 1 + 33;

// number_of_witness_elements + sig_length + schnorr sig
pub const P2TR_KEY_PATH_WITNESS_WEIGHT: u64 = 1 + 1 + 64;

// script_sig pushing the 22 byte P2WPKH redeem script, length byte included.
pub const P2SH_P2WPKH_SCRIPT_SIG_WEIGHT: u64 = (1 + 1 + 22) * 4;

// Upper bound for a P2PKH script_sig (length byte, signature push, compressed key push).
pub const P2PKH_SCRIPT_SIG_WEIGHT: u64 = (1 + 1 + 73 + 1 + 33) * 4;

// Bitcoin Core error code returned when a transaction or outpoint is unknown.
pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
