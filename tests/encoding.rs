use proptest::prelude::*;
use seqconv::encoding::{trim, Alphabet, SequenceEncoder, UnknownPolicy};
use seqconv::tensors::Tensor;
use seqconv::ErrorClass;

#[test]
fn test_one_hot_layout() {
    let x = SequenceEncoder::dna().encode::<f64, _>(&["ACGTN"]).unwrap();
    assert_eq!(x.shape, vec![1, 20]);
    #[rustfmt::skip]
    let expected = vec![
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
        0.0, 0.0, 0.0, 0.0,
    ];
    assert_eq!(x.data, expected);
}

#[test]
fn test_unequal_lengths_are_rejected() {
    let err = SequenceEncoder::dna()
        .encode::<f32, _>(&["ACGT", "ACG"])
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Shape);
}

#[test]
fn test_empty_batch_and_empty_sequences() {
    let encoder = SequenceEncoder::dna();
    let none = encoder.encode::<f32, &str>(&[]).unwrap();
    assert_eq!(none.shape, vec![0, 0]);

    let blank = encoder.encode::<f32, _>(&["", ""]).unwrap();
    assert_eq!(blank.shape, vec![2, 0]);
    assert_eq!(encoder.decode(&blank).unwrap(), vec![Vec::<u8>::new(); 2]);
}

#[test]
fn test_unknown_bytes_follow_policy() {
    let zero = SequenceEncoder::dna().encode::<f32, _>(&["xN"]).unwrap();
    assert!(zero.data.iter().all(|&v| v == 0.0));

    let uniform = SequenceEncoder::new(Alphabet::dna(), UnknownPolicy::Uniform);
    let x = uniform.encode::<f32, _>(&["aN"]).unwrap();
    assert!(x.data.iter().all(|&v| v == 0.25));
    assert_eq!(uniform.decode(&x).unwrap(), vec![b"NN".to_vec()]);
}

#[test]
fn test_decode_maps_non_one_hot_to_unknown() {
    let encoder = SequenceEncoder::dna();
    let x = Tensor::new(
        vec![1, 12],
        vec![
            0.0, 1.0, 0.0, 0.0, // C
            1.0, 1.0, 0.0, 0.0, // two hot
            0.0, 0.0, 0.5, 0.0, // not one
        ],
    );
    assert_eq!(encoder.decode(&x).unwrap(), vec![b"CNN".to_vec()]);

    let bad = Tensor::new(vec![1, 6], vec![0.0f32; 6]);
    assert_eq!(encoder.decode(&bad).unwrap_err().class(), ErrorClass::Shape);
}

#[test]
fn test_encode_rows_matches_encode() {
    let encoder = SequenceEncoder::dna();
    let rows = encoder.encode_rows::<f32>(b"ACGTTTGCA", 3, 3).unwrap();
    let seqs = encoder.encode::<f32, _>(&["ACG", "TTT", "GCA"]).unwrap();
    assert_eq!(rows, seqs);

    let err = encoder.encode_rows::<f32>(b"ACGT", 3, 3).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Shape);
}

#[test]
fn test_custom_alphabet() {
    let rna = Alphabet::new(b"ACGU", b'N').unwrap();
    let encoder = SequenceEncoder::new(rna, UnknownPolicy::Zero);
    let x = encoder.encode::<f64, _>(&["UGCA"]).unwrap();
    assert_eq!(x.data[3], 1.0);
    assert_eq!(encoder.decode(&x).unwrap(), vec![b"UGCA".to_vec()]);

    assert!(Alphabet::new(b"", b'N').is_err());
    assert!(Alphabet::new(b"ACGN", b'N').is_err());
}

#[test]
fn test_trim() {
    assert_eq!(trim(b"AACGTT", (2, 2)).unwrap(), b"CG");
    assert_eq!(trim(b"ACGT", (0, 0)).unwrap(), b"ACGT");
    assert_eq!(trim(b"ACGT", (4, 0)).unwrap(), b"");
    assert_eq!(
        trim(b"ACGT", (3, 2)).unwrap_err().class(),
        ErrorClass::Precondition
    );
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(seqs in prop::collection::vec("[ACGTN]{0,40}", 1..6)) {
        let length = seqs[0].len();
        let seqs: Vec<String> = seqs
            .into_iter()
            .map(|s| s.chars().cycle().take(length).collect())
            .collect();
        prop_assume!(seqs.iter().all(|s| s.len() == length));

        let encoder = SequenceEncoder::dna();
        let x = encoder.encode::<f32, _>(&seqs).unwrap();
        prop_assert_eq!(x.shape.clone(), vec![seqs.len(), length * 4]);
        let decoded = encoder.decode(&x).unwrap();
        let expected: Vec<Vec<u8>> = seqs.iter().map(|s| s.as_bytes().to_vec()).collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn prop_every_known_position_is_one_hot(seq in "[ACGT]{1,64}") {
        let x = SequenceEncoder::dna().encode::<f64, _>(&[seq.as_str()]).unwrap();
        for position in x.data.chunks(4) {
            prop_assert_eq!(position.iter().sum::<f64>(), 1.0);
        }
    }
}
