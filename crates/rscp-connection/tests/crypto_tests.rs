use rscp_connection::{RscpCipher, BLOCK_SIZE};

#[test]
fn encrypt_pads_to_block_multiple_and_decrypts() {
    let mut device = RscpCipher::new("secret-key");
    let mut client = RscpCipher::new("secret-key");
    let plain: Vec<u8> = (0..45u8).collect();

    let encrypted = client.encrypt(&plain);
    assert_eq!(encrypted.len(), 2 * BLOCK_SIZE);
    assert_ne!(&encrypted[..plain.len()], plain.as_slice());

    let decrypted = device.decrypt(&encrypted).expect("decrypt");
    assert_eq!(&decrypted[..plain.len()], plain.as_slice());
    assert!(decrypted[plain.len()..].iter().all(|b| *b == 0));
}

#[test]
fn iv_chains_across_frames() {
    let mut sender = RscpCipher::new("secret-key");
    let mut receiver = RscpCipher::new("secret-key");
    let plain = [0x42u8; BLOCK_SIZE];

    let first = sender.encrypt(&plain);
    let second = sender.encrypt(&plain);
    assert_ne!(first, second, "identical frames must not repeat ciphertext");

    assert_eq!(receiver.decrypt(&first).expect("first"), plain.to_vec());
    assert_eq!(receiver.decrypt(&second).expect("second"), plain.to_vec());
}

#[test]
fn reset_restarts_the_chain() {
    let mut cipher = RscpCipher::new("secret-key");
    let plain = [7u8; BLOCK_SIZE];

    let first = cipher.encrypt(&plain);
    cipher.reset();
    let again = cipher.encrypt(&plain);
    assert_eq!(first, again);
}

#[test]
fn wrong_key_yields_garbage_not_plaintext() {
    let mut sender = RscpCipher::new("secret-key");
    let mut receiver = RscpCipher::new("other-key");
    let plain = [0xE3u8; 2 * BLOCK_SIZE];

    let decrypted = receiver.decrypt(&sender.encrypt(&plain)).expect("aligned input");
    assert_ne!(decrypted, plain.to_vec());
}

#[test]
fn misaligned_or_empty_input_is_rejected() {
    let mut cipher = RscpCipher::new("secret-key");

    assert!(cipher.decrypt(&[]).is_none());
    assert!(cipher.decrypt(&[0u8; BLOCK_SIZE + 5]).is_none());
}

#[test]
fn long_keys_are_truncated_to_32_bytes() {
    let long_key = "k".repeat(40);
    let mut truncated = RscpCipher::new(&"k".repeat(32));
    let mut full = RscpCipher::new(&long_key);
    let plain = [1u8; BLOCK_SIZE];

    assert_eq!(truncated.encrypt(&plain), full.encrypt(&plain));
}

#[test]
fn first_block_matches_rijndael_reference_output() {
    let key: String = (0u8..32).map(char::from).collect();
    let mut cipher = RscpCipher::new(&key);
    // The initial IV is all 0xFF, so this plaintext reaches the block cipher as 00..1f.
    let plain: Vec<u8> = (0u8..32).map(|byte| byte ^ 0xFF).collect();

    let encrypted = cipher.encrypt(&plain);
    assert_eq!(
        encrypted,
        [
            0x62, 0x3d, 0x2b, 0xd4, 0xca, 0x37, 0x96, 0xdc, 0x3d, 0x02, 0xec, 0xf2, 0xf3, 0x7f,
            0xb6, 0x37, 0xfd, 0x3d, 0xa5, 0x85, 0x09, 0xce, 0xbb, 0x67, 0xab, 0x92, 0x65, 0xb0,
            0x4d, 0xb5, 0x1e, 0x7d,
        ]
    );
}
