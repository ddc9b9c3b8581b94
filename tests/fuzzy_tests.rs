use fuzzy_hashlib::{
    comparator, hash_buf, hash_many, Algorithm, Backend, Digest, FuzzyHash, FuzzyHashError,
    InvalidOperation, Sdhash, SdhashDigest, Ssdeep, SsdeepDigest, Tlsh, TlshDigest,
};

const GOLDEN_LEN: usize = 4096;
const GOLDEN_SSDEEP: &str = "96:60D/ucey7/cIHEAe/gmb4TZuCeXaXQ7diFzFvG6pcEob:xD/uceMkIkJ/jb4ACeXCQ7diBlG6apb";
const GOLDEN_TLSH: &str = "D0815CFA132DF6A19448F05091F94BAC3B28DAF29AC93D2E5410496059A4383C2FE559";
const GOLDEN_SDHASH: &str = concat!(
    "sdbf:03:4096:sha256:256:5:7ff:160:1:63:",
    "800050000200601000283000000c000000110408020210820281800800420023",
    "8200810008120010089004009004202261082204060541400021030224008042",
    "e001a2080410010480400000200431000d00080a020600248042001400000031",
    "060024c4004e000083050000900020000224d24000200c040102001048108000",
    "000000020014002018501c100000801294240200188002002104800002000408",
    "004001482010000010008003111024a400000000028c00440000000080020801",
    "10c2440000000054100400020400100002001202410010008000224900220020",
    "24001040420460082080840142012005008a0100004105444388211b08800c08",
);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic test input from a linear congruential generator.
fn golden_data(len: usize) -> Vec<u8> {
    let mut x: u32 = 1;
    (0..len)
        .map(|_| {
            x = x.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fff_ffff;
            (x >> 16) as u8
        })
        .collect()
}

fn random_data(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

fn check_golden<B: Backend + Default + Clone>(expected: &str) {
    let data = golden_data(GOLDEN_LEN);
    let mut digest = Digest::<B>::from_buffer(&data).unwrap();
    assert_eq!(digest.text().unwrap(), expected);

    let mut recorded = Digest::<B>::from_hash(expected).unwrap();
    assert!(comparator::text_eq(&mut digest, &mut recorded).unwrap());
    assert_eq!(comparator::compare(&mut digest, &mut recorded).unwrap(), 100);

    let hash = hash_buf(digest.algorithm(), &data).unwrap();
    assert_eq!(hash, expected);
    assert_eq!(hash, FuzzyHash::parse(digest.algorithm(), expected).unwrap());
}

#[test]
fn test_golden_ssdeep() {
    init_logger();
    assert_eq!(&golden_data(4)[..], &[0xc6, 0x7e, 0x81, 0x6b]);
    check_golden::<Ssdeep>(GOLDEN_SSDEEP);
}

#[test]
fn test_golden_tlsh() {
    init_logger();
    check_golden::<Tlsh>(GOLDEN_TLSH);
}

#[test]
fn test_golden_sdhash() {
    init_logger();
    check_golden::<Sdhash>(GOLDEN_SDHASH);
}

fn check_reflexive_and_commutative<B: Backend + Default>(len: usize) {
    let data = random_data(len);
    let mut similar = data.clone();
    for byte in &mut similar[len / 2..len / 2 + 64] {
        *byte ^= 0x5a;
    }
    let other = random_data(len);

    let mut a = Digest::<B>::from_buffer(&data).unwrap();
    let mut a_again = Digest::<B>::from_buffer(&data).unwrap();
    let mut b = Digest::<B>::from_buffer(&similar).unwrap();
    let mut c = Digest::<B>::from_buffer(&other).unwrap();

    assert_eq!(comparator::compare(&mut a, &mut a_again).unwrap(), 100);
    let ab = comparator::compare(&mut a, &mut b).unwrap();
    let ba = comparator::compare(&mut b, &mut a).unwrap();
    assert_eq!(ab, ba);
    assert!(ab <= 100);
    let ac = comparator::compare(&mut a, &mut c).unwrap();
    assert!(ac < 100);
    assert!(ab >= ac, "similar {ab}, unrelated {ac}");
}

#[test]
fn test_similarity_properties() {
    init_logger();
    check_reflexive_and_commutative::<Ssdeep>(50_000);
    check_reflexive_and_commutative::<Sdhash>(50_000);
    check_reflexive_and_commutative::<Tlsh>(50_000);
}

fn check_copy_matches<B: Backend + Default + Clone>(data: &[u8]) {
    let mut digest = Digest::<B>::from_buffer(data).unwrap();
    let mut copy = digest.copy().unwrap();
    assert_eq!(digest.text().unwrap(), copy.text().unwrap());
}

#[test]
fn test_copy_has_same_text() {
    init_logger();
    let data = random_data(10_000);
    check_copy_matches::<Ssdeep>(&data);
    check_copy_matches::<Sdhash>(&data);
    check_copy_matches::<Tlsh>(&data);
}

#[test]
fn test_update_is_chunk_insensitive() {
    init_logger();
    let data = random_data(30_000);

    let mut ssdeep = SsdeepDigest::from_buffer(&data[..1]).unwrap();
    let mut tlsh = TlshDigest::from_buffer(&data[..1]).unwrap();
    for chunk in data[1..].chunks(4099) {
        ssdeep.update(chunk).unwrap();
        tlsh.update(chunk).unwrap();
    }
    assert_eq!(
        ssdeep.text().unwrap(),
        SsdeepDigest::from_buffer(&data).unwrap().text().unwrap()
    );
    assert_eq!(
        tlsh.text().unwrap(),
        TlshDigest::from_buffer(&data).unwrap().text().unwrap()
    );
}

#[test]
fn test_hash_derived_digests_reject_update() {
    init_logger();
    let mut ssdeep = SsdeepDigest::from_hash(GOLDEN_SSDEEP).unwrap();
    let mut tlsh = TlshDigest::from_hash(GOLDEN_TLSH).unwrap();
    let mut sdhash = SdhashDigest::from_hash(GOLDEN_SDHASH).unwrap();
    for error in [
        ssdeep.update(b"data").unwrap_err(),
        tlsh.update(b"data").unwrap_err(),
        sdhash.update(b"data").unwrap_err(),
    ] {
        assert!(matches!(error, FuzzyHashError::InvalidOperation { .. }));
    }
    assert_eq!(
        ssdeep.update(b"data").unwrap_err(),
        FuzzyHashError::InvalidOperation {
            algorithm: Algorithm::RollingContext,
            operation: InvalidOperation::DerivedFromHash,
        }
    );
}

#[test]
fn test_minimum_sizes() {
    init_logger();
    let error = SdhashDigest::from_buffer(&random_data(511)).unwrap_err();
    assert_eq!(
        error,
        FuzzyHashError::InputTooSmall {
            algorithm: Algorithm::StatisticalBloom,
            actual_size: 511,
            required_size: 512,
        }
    );
    assert!(error.to_string().contains("512"));
    assert!(SdhashDigest::from_buffer(&random_data(512)).is_ok());

    let data = random_data(256);
    let mut tlsh = TlshDigest::from_buffer(&data[..255]).unwrap();
    assert!(matches!(
        tlsh.text(),
        Err(FuzzyHashError::InputTooSmall {
            actual_size: 255,
            required_size: 256,
            ..
        })
    ));
    tlsh.update(&data[255..]).unwrap();
    let text = tlsh.text().unwrap();
    assert_eq!(tlsh.text().unwrap(), text);
}

#[test]
fn test_equality_is_textual() {
    init_logger();
    // Different texts that still score 100.
    let a = FuzzyHash::parse(Algorithm::RollingContext, "96:ABCDEFGHIJKLMNOP:QRSTUVWXYZabcdef").unwrap();
    let b = FuzzyHash::parse(Algorithm::RollingContext, "192:QRSTUVWXYZabcdef:ghijklmnopqrstuv").unwrap();
    assert_eq!(a.compare(&b).unwrap(), 100);
    assert_ne!(a, b);

    let ssdeep = FuzzyHash::parse(Algorithm::RollingContext, GOLDEN_SSDEEP).unwrap();
    let tlsh = FuzzyHash::parse(Algorithm::StreamingFinalized, GOLDEN_TLSH).unwrap();
    assert_eq!(
        ssdeep.compare(&tlsh),
        Err(FuzzyHashError::AlgorithmMismatch {
            left: Algorithm::RollingContext,
            right: Algorithm::StreamingFinalized,
        })
    );
}

#[test]
fn test_malformed_hashes() {
    init_logger();
    for algorithm in Algorithm::ALL {
        assert!(matches!(
            FuzzyHash::parse(algorithm, "definitely not a digest"),
            Err(FuzzyHashError::MalformedHash { .. })
        ));
    }
    assert!(matches!(
        SdhashDigest::from_hash("sdbf:03:600:sha256:256:5:7ff:160:18446744073709551615:1:"),
        Err(FuzzyHashError::MalformedHash { .. })
    ));
    assert!(matches!(
        TlshDigest::from_hash(&GOLDEN_TLSH.to_ascii_lowercase()),
        Err(FuzzyHashError::MalformedHash { .. })
    ));
}

#[test]
fn test_hash_many_matches_hash_buf() {
    init_logger();
    let inputs: Vec<Vec<u8>> = (0..16).map(|i| random_data(1000 + 100 * i)).collect();
    for algorithm in Algorithm::ALL {
        let results = hash_many(algorithm, &inputs);
        for (data, result) in inputs.iter().zip(results) {
            assert_eq!(result.unwrap(), hash_buf(algorithm, data).unwrap());
        }
    }
}

#[test]
fn test_tlsh_distance() {
    init_logger();
    let data = golden_data(GOLDEN_LEN);
    let mut longer = data.clone();
    longer.extend(random_data(GOLDEN_LEN));
    let mut digest = TlshDigest::from_buffer(&longer).unwrap();
    let text = digest.text().unwrap();
    let with_length = fuzzy_hashlib::tlsh::diff(GOLDEN_TLSH, &text).unwrap();
    let without_length = fuzzy_hashlib::tlsh::diff_ignoring_length(GOLDEN_TLSH, &text).unwrap();
    assert!(without_length < with_length);
    assert_eq!(fuzzy_hashlib::tlsh::diff(GOLDEN_TLSH, GOLDEN_TLSH).unwrap(), 0);
}
