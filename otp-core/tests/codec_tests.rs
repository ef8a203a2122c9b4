#![allow(missing_docs)]
use otp_core::codec::{self, PadCursor};

fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            state.to_be_bytes()[0]
        })
        .collect()
}

#[test]
fn test_transform_is_an_involution() {
    for len in [0, 1, 7, 64, 1024, 4992] {
        let data = pseudo_random(len, 7);
        let pad = pseudo_random(len + 13, 99);

        let ciphertext = codec::transform(&data, &pad);
        assert_eq!(ciphertext.len(), data.len());
        assert_eq!(codec::transform(&ciphertext, &pad), data, "len {len}");
    }
}

#[test]
fn test_lenient_transform_still_round_trips_with_short_pad() {
    let data = b"the tail of this message is passed through".to_vec();
    let pad = pseudo_random(10, 3);

    let ciphertext = codec::transform(&data, &pad);
    assert_eq!(&ciphertext[10..], &data[10..]);
    assert_eq!(codec::transform(&ciphertext, &pad), data);
    assert!(codec::seal(&data, &pad).is_err());
}

#[test]
fn test_audio_chunks_use_disjoint_pad_ranges() {
    // 16-bit mono audio, 1024 frames per chunk.
    let chunk_len = 2048;
    let pad = pseudo_random(4992, 11);
    let audio = pseudo_random(chunk_len * 2, 5);

    let mut cursor = PadCursor::new(&pad);
    let mut sealed = Vec::new();
    for chunk in audio.chunks(chunk_len) {
        sealed.push(cursor.apply(chunk).unwrap());
    }
    assert_eq!(sealed[0].0, 0);
    assert_eq!(sealed[1].0, chunk_len);
    assert_eq!(cursor.remaining(), 4992 - 2 * chunk_len);
    assert!(cursor.apply(&audio[..chunk_len]).is_err(), "third chunk must not wrap around");

    let mut decoded = Vec::new();
    for (offset, ciphertext) in &sealed {
        decoded.extend(codec::transform(ciphertext, &pad[*offset..]));
    }
    assert_eq!(decoded, audio);
}
