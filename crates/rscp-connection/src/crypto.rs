use std::fmt;
use std::sync::OnceLock;

/// Rijndael block size used by RSCP (256 bit, not the 128 bit AES block).
pub const BLOCK_SIZE: usize = 32;
const KEY_SIZE: usize = 32;
const COLUMNS: usize = BLOCK_SIZE / 4;
const KEY_WORDS: usize = KEY_SIZE / 4;
const ROUNDS: usize = 14;
/// Row offsets of ShiftRows for an 8 column state.
const ROW_SHIFTS: [usize; 4] = [0, 1, 3, 4];
const KEY_PADDING: u8 = 0xFF;
const INITIAL_IV: [u8; BLOCK_SIZE] = [0xFF; BLOCK_SIZE];

type Block = [u8; BLOCK_SIZE];

/// CBC channel shared with the device.
///
/// Both directions keep their own IV which continues across frames of a single
/// connection; [`RscpCipher::reset`] must be called whenever a new connection
/// is opened.
pub struct RscpCipher {
    cipher: Rijndael256,
    encrypt_iv: Block,
    decrypt_iv: Block,
}

impl RscpCipher {
    /// Derives the cipher key from the pre-shared RSCP key configured on the device.
    pub fn new(rscp_key: &str) -> Self {
        let mut key = [KEY_PADDING; KEY_SIZE];
        let bytes = rscp_key.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        key[..len].copy_from_slice(&bytes[..len]);

        Self {
            cipher: Rijndael256::new(&key),
            encrypt_iv: INITIAL_IV,
            decrypt_iv: INITIAL_IV,
        }
    }

    pub fn reset(&mut self) {
        self.encrypt_iv = INITIAL_IV;
        self.decrypt_iv = INITIAL_IV;
    }

    /// Zero-pads `plain` to whole blocks and encrypts it.
    pub fn encrypt(&mut self, plain: &[u8]) -> Vec<u8> {
        let blocks = plain.len().div_ceil(BLOCK_SIZE).max(1);
        let mut out = vec![0u8; blocks * BLOCK_SIZE];
        out[..plain.len()].copy_from_slice(plain);

        let mut iv = self.encrypt_iv;
        for chunk in out.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            for (dst, (p, v)) in block.iter_mut().zip(chunk.iter().zip(iv.iter())) {
                *dst = p ^ v;
            }
            self.cipher.encrypt_block(&mut block);
            chunk.copy_from_slice(&block);
            iv = block;
        }
        self.encrypt_iv = iv;

        out
    }

    /// Decrypts whole blocks. Returns `None` for empty or misaligned input.
    ///
    /// A wrong key is not detected here; the output is simply garbage.
    pub fn decrypt(&mut self, cipher: &[u8]) -> Option<Vec<u8>> {
        if cipher.is_empty() || cipher.len() % BLOCK_SIZE != 0 {
            return None;
        }

        let mut out = Vec::with_capacity(cipher.len());
        let mut previous = self.decrypt_iv;
        for chunk in cipher.chunks_exact(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            self.cipher.decrypt_block(&mut block);
            for (b, v) in block.iter_mut().zip(previous.iter()) {
                *b ^= v;
            }
            out.extend_from_slice(&block);
            previous.copy_from_slice(chunk);
        }
        self.decrypt_iv = previous;

        Some(out)
    }
}

impl fmt::Debug for RscpCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RscpCipher").finish_non_exhaustive()
    }
}

struct Tables {
    sbox: [u8; 256],
    inv_sbox: [u8; 256],
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut sbox = [0u8; 256];
        let mut inv_sbox = [0u8; 256];
        for x in 0..=255u8 {
            let inv = gf_inverse(x);
            let s = inv
                ^ inv.rotate_left(1)
                ^ inv.rotate_left(2)
                ^ inv.rotate_left(3)
                ^ inv.rotate_left(4)
                ^ 0x63;
            sbox[usize::from(x)] = s;
            inv_sbox[usize::from(s)] = x;
        }
        Tables { sbox, inv_sbox }
    })
}

fn xtime(a: u8) -> u8 {
    let shifted = a << 1;
    if a & 0x80 != 0 {
        shifted ^ 0x1B
    } else {
        shifted
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        a = xtime(a);
        b >>= 1;
    }
    product
}

fn gf_inverse(x: u8) -> u8 {
    if x == 0 {
        return 0;
    }
    // x^254 == x^-1 in GF(2^8)
    let mut result = 1u8;
    let mut base = x;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Rijndael with 256 bit block and 256 bit key (Nb = 8, Nk = 8, 14 rounds).
///
/// State bytes are stored column-major, byte `4 * column + row`, which is also
/// the layout of the expanded round keys.
struct Rijndael256 {
    round_keys: [Block; ROUNDS + 1],
}

impl Rijndael256 {
    fn new(key: &[u8; KEY_SIZE]) -> Self {
        let sbox = &tables().sbox;
        let total_words = COLUMNS * (ROUNDS + 1);
        let mut words = vec![[0u8; 4]; total_words];
        for (idx, word) in words.iter_mut().take(KEY_WORDS).enumerate() {
            word.copy_from_slice(&key[4 * idx..4 * idx + 4]);
        }

        let mut rcon = 1u8;
        for idx in KEY_WORDS..total_words {
            let mut temp = words[idx - 1];
            if idx % KEY_WORDS == 0 {
                temp.rotate_left(1);
                for byte in temp.iter_mut() {
                    *byte = sbox[usize::from(*byte)];
                }
                temp[0] ^= rcon;
                rcon = xtime(rcon);
            } else if idx % KEY_WORDS == 4 {
                for byte in temp.iter_mut() {
                    *byte = sbox[usize::from(*byte)];
                }
            }
            let previous = words[idx - KEY_WORDS];
            for (dst, (p, t)) in words[idx].iter_mut().zip(previous.iter().zip(temp.iter())) {
                *dst = p ^ t;
            }
        }

        let mut round_keys = [[0u8; BLOCK_SIZE]; ROUNDS + 1];
        for (round, round_key) in round_keys.iter_mut().enumerate() {
            for column in 0..COLUMNS {
                let word = words[round * COLUMNS + column];
                round_key[4 * column..4 * column + 4].copy_from_slice(&word);
            }
        }

        Self { round_keys }
    }

    fn encrypt_block(&self, state: &mut Block) {
        let sbox = &tables().sbox;
        add_round_key(state, &self.round_keys[0]);
        for round in 1..ROUNDS {
            sub_bytes(state, sbox);
            shift_rows(state);
            mix_columns(state);
            add_round_key(state, &self.round_keys[round]);
        }
        sub_bytes(state, sbox);
        shift_rows(state);
        add_round_key(state, &self.round_keys[ROUNDS]);
    }

    fn decrypt_block(&self, state: &mut Block) {
        let inv_sbox = &tables().inv_sbox;
        add_round_key(state, &self.round_keys[ROUNDS]);
        for round in (1..ROUNDS).rev() {
            inv_shift_rows(state);
            sub_bytes(state, inv_sbox);
            add_round_key(state, &self.round_keys[round]);
            inv_mix_columns(state);
        }
        inv_shift_rows(state);
        sub_bytes(state, inv_sbox);
        add_round_key(state, &self.round_keys[0]);
    }
}

fn add_round_key(state: &mut Block, round_key: &Block) {
    for (byte, key) in state.iter_mut().zip(round_key.iter()) {
        *byte ^= key;
    }
}

fn sub_bytes(state: &mut Block, table: &[u8; 256]) {
    for byte in state.iter_mut() {
        *byte = table[usize::from(*byte)];
    }
}

fn shift_rows(state: &mut Block) {
    let input = *state;
    for row in 1..4 {
        for column in 0..COLUMNS {
            let source = (column + ROW_SHIFTS[row]) % COLUMNS;
            state[4 * column + row] = input[4 * source + row];
        }
    }
}

fn inv_shift_rows(state: &mut Block) {
    let input = *state;
    for row in 1..4 {
        for column in 0..COLUMNS {
            let target = (column + ROW_SHIFTS[row]) % COLUMNS;
            state[4 * target + row] = input[4 * column + row];
        }
    }
}

fn mix_columns(state: &mut Block) {
    for column in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [column[0], column[1], column[2], column[3]];
        column[0] = gf_mul(a0, 2) ^ gf_mul(a1, 3) ^ a2 ^ a3;
        column[1] = a0 ^ gf_mul(a1, 2) ^ gf_mul(a2, 3) ^ a3;
        column[2] = a0 ^ a1 ^ gf_mul(a2, 2) ^ gf_mul(a3, 3);
        column[3] = gf_mul(a0, 3) ^ a1 ^ a2 ^ gf_mul(a3, 2);
    }
}

fn inv_mix_columns(state: &mut Block) {
    for column in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [column[0], column[1], column[2], column[3]];
        column[0] = gf_mul(a0, 14) ^ gf_mul(a1, 11) ^ gf_mul(a2, 13) ^ gf_mul(a3, 9);
        column[1] = gf_mul(a0, 9) ^ gf_mul(a1, 14) ^ gf_mul(a2, 11) ^ gf_mul(a3, 13);
        column[2] = gf_mul(a0, 13) ^ gf_mul(a1, 9) ^ gf_mul(a2, 14) ^ gf_mul(a3, 11);
        column[3] = gf_mul(a0, 11) ^ gf_mul(a1, 13) ^ gf_mul(a2, 9) ^ gf_mul(a3, 14);
    }
}
