// End-to-end tests of the host surface: raw chunks in, reference location
// out, plus the budget/reset failure paths a host relies on.

mod common;

use common::{
    de_bruijn_bases, event_levels, init_logs, level_signal, pipeline_opts, synth_model, NaiveFmi,
    BASES,
};
use squigmap::{Chunk, Fmi, Mapper, State};

const SAMPLES_PER_EVENT: usize = 10;

#[test]
fn test_single_chunk_read_maps_to_reference() {
    init_logs();
    let model = synth_model(4);
    let bases = de_bruijn_bases(4);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let opts = pipeline_opts();
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    // The trailing mean-level plateau never completes as an event; it only
    // closes out the final real k-mer, so the normalizer sees every level
    let mut levels = event_levels(&model, &bases);
    levels.push(model.model_mean());
    let signal = level_signal(&levels, SAMPLES_PER_EVENT);
    mapper.new_read(Chunk::new("read_1", 1, signal));

    let nevents = mapper.process_chunk();
    assert!(
        nevents > 200,
        "a 256-plateau chunk should segment into most of its events, got {}",
        nevents
    );
    assert!(mapper.is_chunk_processed());

    let mut mapped = false;
    for _ in 0..8 {
        if mapper.map_chunk() {
            mapped = true;
            break;
        }
    }
    assert!(mapped, "the read should map before its events run out");
    assert_eq!(mapper.get_state(), State::Success);

    let loc = mapper.pop_loc();
    assert!(loc.is_mapped());
    assert_eq!(loc.rf_name, "ref");
    assert!(loc.match_count > opts.min_aln_len as u16);
    assert_eq!(mapper.get_state(), State::Inactive);
}

#[test]
fn test_chunked_read_never_fails_spuriously() {
    init_logs();
    let model = synth_model(4);
    let bases = de_bruijn_bases(4);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let mut opts = pipeline_opts();
    opts.max_chunks_proc = 0; // unlimited
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    let mut levels = event_levels(&model, &bases);
    levels.push(model.model_mean());
    let signal = level_signal(&levels, SAMPLES_PER_EVENT);
    let mut chunks: Vec<Chunk> = signal
        .chunks(400)
        .map(|s| Chunk::new("read_2", 2, s.to_vec()))
        .collect();
    chunks.reverse();

    mapper.new_read(chunks.pop().unwrap());
    loop {
        mapper.process_chunk();
        if mapper.map_chunk() {
            break;
        }
        match chunks.pop() {
            Some(mut c) => {
                assert!(mapper.swap_chunk(&mut c), "processed mapper must accept chunks");
            }
            None => break,
        }
    }

    assert_ne!(
        mapper.get_state(),
        State::Failure,
        "a clean read must not fail while signal remains"
    );
}

#[test]
fn test_chunk_budget_forces_failure() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let mut opts = pipeline_opts();
    opts.max_chunks_proc = 2;
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    // Silence so no mapping interferes with the budget accounting
    mapper.new_read(Chunk::new("read_3", 3, vec![90.0; 400]));
    mapper.process_chunk();

    let mut c2 = Chunk::new("read_3", 3, vec![90.0; 400]);
    assert!(mapper.swap_chunk(&mut c2));
    mapper.process_chunk();

    let mut c3 = Chunk::new("read_3", 3, vec![90.0; 400]);
    assert!(mapper.swap_chunk(&mut c3), "budget overflow still consumes the chunk");
    assert_eq!(mapper.get_state(), State::Failure);
    assert!(mapper.is_resetting());
    assert!(c3.raw.is_empty(), "the over-budget chunk is drained");
}

#[test]
fn test_end_read_fails_via_map_chunk() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let opts = pipeline_opts();
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    mapper.new_read(Chunk::new("read_4", 4, vec![90.0; 200]));
    assert!(!mapper.end_read(99), "unrelated read number is ignored");
    assert!(!mapper.is_resetting());
    assert!(mapper.end_read(4));
    assert!(mapper.is_resetting());

    assert!(mapper.map_chunk(), "pending reset terminates the read");
    assert_eq!(mapper.get_state(), State::Failure);
    assert!(!mapper.is_resetting(), "the observed flag clears");

    mapper.deactivate();
    assert_eq!(mapper.get_state(), State::Inactive);
}

#[test]
fn test_last_chunk_drained_fails() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let opts = pipeline_opts();
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    // Flat signal: no events, so the normalizer is empty after processing
    mapper.new_read(Chunk::new("read_8", 8, vec![90.0; 300]));
    mapper.process_chunk();
    assert!(!mapper.map_chunk(), "nothing to map yet, but the read stays live");
    assert_eq!(mapper.get_state(), State::Mapping);

    mapper.set_last_chunk();
    assert!(mapper.map_chunk(), "no more signal is coming; the read ends");
    assert_eq!(mapper.get_state(), State::Failure);
}

#[test]
fn test_lost_read_is_replaced() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let opts = pipeline_opts();
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    mapper.new_read(Chunk::new("read_5", 5, vec![90.0; 200]));
    assert_eq!(mapper.get_state(), State::Mapping);

    // The host moved on without finishing read 5
    mapper.new_read(Chunk::new("read_6", 6, vec![90.0; 200]));
    assert_eq!(mapper.get_state(), State::Mapping);
    assert_eq!(mapper.get_read().id, "read_6");
    assert_eq!(mapper.get_read().number, 6);
    assert_eq!(mapper.get_read().num_chunks, 1);
}

#[test]
fn test_normalizer_overflow_abandons_chunk() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let mut opts = pipeline_opts();
    opts.evt_buffer_len = 8;
    let mut mapper = Mapper::new(&opts, &model, &fmi).unwrap();

    // ~20 plateaus: far more events than the 8-slot buffer can hold
    let levels = event_levels(&model, &bases[..23]);
    let signal = level_signal(&levels, SAMPLES_PER_EVENT);
    mapper.new_read(Chunk::new("read_7", 7, signal));

    let nevents = mapper.process_chunk();
    assert_eq!(nevents, 8, "exactly one buffer's worth of events fits");
    assert!(
        mapper.is_chunk_processed(),
        "the overflowing chunk is abandoned, not wedged"
    );
    assert_eq!(mapper.get_state(), State::Mapping);
}

#[test]
fn test_kmer_ranges_spell_their_kmer() {
    let model = synth_model(3);
    let bases = de_bruijn_bases(3);
    let fmi = NaiveFmi::from_read_bases(&bases);
    let ranges = squigmap::fmi::kmer_fm_ranges(&model, &fmi);

    let k = model.kmer_len();
    let mut valid = 0;
    for (kmer, range) in ranges.iter().enumerate() {
        if !range.is_valid() {
            continue;
        }
        valid += 1;
        for row in range.start..=range.end {
            let pos = fmi.sa(row) as usize;
            // The indexed pattern is the k-mer's bases newest-first
            for j in 0..k {
                let expect = BASES[model.kmer_base(kmer as u16, k - 1 - j) as usize];
                assert_eq!(
                    fmi.text[pos + j],
                    expect,
                    "row {} of kmer {} must spell its pattern",
                    row,
                    kmer
                );
            }
        }
    }
    // A de Bruijn text contains every k-mer, so every range resolves
    assert_eq!(valid, model.kmer_count(), "all kmers occur in the text");
}
