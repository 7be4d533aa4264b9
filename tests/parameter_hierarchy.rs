//! Parameter resolution, identifier access and candidate persistence
use grainbow::modulation_router::{ModSourceId, ModulationRouter};
use grainbow::parameters::{ParamCandidate, ParamLevel, ParamType, Parameters, ParametersState};
use grainbow::pitch_class::PitchClass;
use grainbow::GrainError;

const PC: PitchClass = PitchClass::Fs;

#[test]
fn test_resolution_for_every_flag_combination() {
    let generator = ParamLevel::Generator(PC, 1);
    let sibling = ParamLevel::Generator(PC, 2);
    let note = ParamLevel::Note(PC);

    for mask in 0..8u8 {
        let gen_used = mask & 1 != 0;
        let note_used = mask & 2 != 0;
        let sibling_used = mask & 4 != 0;

        let params = Parameters::new();
        params.set_param(ParamLevel::Global, ParamType::Gain, 0.1).unwrap();
        params.set_param(note, ParamType::Gain, 0.2).unwrap();
        params.set_param(generator, ParamType::Gain, 0.3).unwrap();
        params.set_param(sibling, ParamType::Gain, 0.4).unwrap();
        params.set_used(note, ParamType::Gain, note_used).unwrap();
        params.set_used(generator, ParamType::Gain, gen_used).unwrap();
        params.set_used(sibling, ParamType::Gain, sibling_used).unwrap();

        let (expected_level, expected_value) = if gen_used {
            (generator, 0.3)
        } else if note_used {
            (note, 0.2)
        } else {
            (ParamLevel::Global, 0.1)
        };
        assert_eq!(
            params.get_used_param(generator, ParamType::Gain),
            expected_level,
            "mask {:03b}",
            mask
        );
        assert_eq!(
            params.get_float_param(generator, ParamType::Gain, None),
            expected_value,
            "mask {:03b}",
            mask
        );
    }
}

#[test]
fn test_other_parameters_unaffected_by_override() {
    let params = Parameters::new();
    let generator = ParamLevel::Generator(PC, 0);
    params.set_param(generator, ParamType::PanAdjust, -0.5).unwrap();
    assert_eq!(params.get_used_param(generator, ParamType::PanAdjust), generator);
    assert_eq!(params.get_used_param(generator, ParamType::Gain), ParamLevel::Global);
    assert_eq!(
        params.get_float_param(generator, ParamType::Gain, None),
        ParamType::Gain.default_value()
    );
}

#[test]
fn test_resolved_values_stay_in_range_under_modulation() {
    let params = Parameters::new();
    let mut router = ModulationRouter::new();
    let level = ParamLevel::Note(PC);
    params.set_param(level, ParamType::GrainDuration, 0.3).unwrap();
    router
        .add_route(level.param_index(ParamType::GrainDuration), ModSourceId::Macro(0), 1.0)
        .unwrap();
    router.macro_mut(0).unwrap().value = 1.0;
    router.process_block();

    let (lo, hi) = ParamType::GrainDuration.range();
    let value = params.get_float_param(ParamLevel::Generator(PC, 3), ParamType::GrainDuration, Some(&router));
    assert!((lo..=hi).contains(&value), "{}", value);
    assert!((value - hi).abs() < 1e-6, "full macro should push to the top of the range");
}

#[test]
fn test_identifier_access() {
    let params = Parameters::new();
    params.set_by_id("fs_gen_2_gain", 0.25).unwrap();
    assert_eq!(params.get_by_id("fs_gen_2_gain").unwrap(), 0.25);
    assert!(params.is_used(ParamLevel::Generator(PC, 2), ParamType::Gain));

    params.set_by_id("global_release", 1.5).unwrap();
    assert_eq!(
        params.get_float_param(ParamLevel::Generator(PitchClass::B, 0), ParamType::Release, None),
        1.5
    );

    params.set_by_id("fs_gen_3_enable", 1.0).unwrap();
    assert!(params.is_generator_enabled(PC, 3));
    params.set_by_id("fs_solo", 3.0).unwrap();
    assert_eq!(params.solo(PC), Some(3));

    assert!(matches!(
        params.set_by_id("fs_gen_9_gain", 0.5),
        Err(GrainError::UnknownParameter(_))
    ));
    assert!(params.get_by_id("nonsense").is_err());
}

#[test]
fn test_candidate_serde_round_trip() {
    let original = ParamCandidate::new(0.123456, -1, 1.0594, 0.0421, 0.87654);
    let json = serde_json::to_string(&original).unwrap();
    let back: ParamCandidate = serde_json::from_str(&json).unwrap();
    assert_eq!(back.octave, original.octave);
    assert!((back.pos_ratio - original.pos_ratio).abs() < 1e-6);
    assert!((back.pb_rate - original.pb_rate).abs() < 1e-6);
    assert!((back.duration - original.duration).abs() < 1e-6);
    assert!((back.salience - original.salience).abs() < 1e-6);
}

#[test]
fn test_preset_keeps_candidates_and_overrides() {
    let params = Parameters::new();
    params
        .set_candidates(
            PC,
            vec![
                ParamCandidate::new(0.1, 0, 1.0, 0.2, 0.9),
                ParamCandidate::new(0.6, 0, 1.0594, 0.1, 0.7),
            ],
        )
        .unwrap();
    params.set_candidate(PC, 0, 1).unwrap();
    params.set_param(ParamLevel::Note(PC), ParamType::Reverse, 1.0).unwrap();

    let text = params.snapshot().to_toml().unwrap();
    let restored = Parameters::new();
    restored.restore(&ParametersState::parse(&text).unwrap()).unwrap();

    assert_eq!(restored.candidates(PC).len(), 2);
    assert_eq!(restored.candidate_index(PC, 0), 1);
    assert!(restored.get_bool_param(ParamLevel::Generator(PC, 0), ParamType::Reverse, None));
    let selected = restored.selected_candidate(PC, 0).unwrap();
    assert!((selected.pb_rate - 1.0594).abs() < 1e-6);
}

#[test]
fn test_invalid_candidates_rejected_without_corrupting_other_notes() {
    let params = Parameters::new();
    params
        .set_candidates(PitchClass::C, vec![ParamCandidate::new(0.5, 0, 1.0, 0.2, 1.0)])
        .unwrap();
    let bad = vec![ParamCandidate::new(1.5, 0, 1.0, 0.2, 1.0)];
    assert!(matches!(
        params.set_candidates(PC, bad),
        Err(GrainError::InvalidCandidates(_))
    ));
    assert!(params.candidates(PC).is_empty());
    assert_eq!(params.candidates(PitchClass::C).len(), 1);
}
