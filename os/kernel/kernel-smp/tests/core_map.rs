use kernel_smp::CoreMap;

#[test]
fn sparse_ids_compact_in_hardware_order() {
    let map = CoreMap::new();
    for hw in [0, 7, 2, 5] {
        map.register_provisional(hw);
    }
    assert_eq!(map.arrived(), 4);
    assert_eq!(map.compact(), Ok(4));
    assert!(map.is_compacted());

    let dense: Vec<_> = (0..4).map(|os| map.hw_core_id(os).unwrap()).collect();
    assert_eq!(dense, vec![0, 2, 5, 7]);
    for (os, hw) in dense.into_iter().enumerate() {
        assert_eq!(map.os_core_id(hw), Some(os));
    }
    for hw in [1, 3, 4, 6, 8] {
        assert_eq!(map.os_core_id(hw), None);
    }
}

#[test]
#[should_panic(expected = "Mismatch in num_cpus and hw_step")]
fn duplicate_hardware_id_breaks_compaction() {
    let map = CoreMap::new();
    map.register_provisional(0);
    map.register_provisional(3);
    map.register_provisional(3);
    let _ = map.compact();
}

#[test]
#[should_panic(expected = "beyond MAX_CORES")]
fn hardware_ids_must_fit_the_map() {
    CoreMap::new().register_provisional(64);
}

#[test]
#[should_panic(expected = "after compaction")]
fn late_registration_is_rejected() {
    let map = CoreMap::new();
    map.register_provisional(0);
    let _ = map.compact();
    map.register_provisional(1);
}
