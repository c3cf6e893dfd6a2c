//! The reference kernel sources must stay compilable WGSL.

#[test]
fn reduction_kernels_parse() {
    let module = naga::front::wgsl::parse_str(include_str!("../../../shaders/reduce.wgsl"))
        .expect("reduce.wgsl must parse");
    let entry_points: Vec<_> = module.entry_points.iter().map(|ep| ep.name.clone()).collect();
    assert!(entry_points.contains(&"reduce_partial".to_string()));
    assert!(entry_points.contains(&"reduce_combine".to_string()));

    let partial = module
        .entry_points
        .iter()
        .find(|ep| ep.name == "reduce_partial")
        .unwrap();
    assert_eq!(partial.workgroup_size, [16, 8, 1]);
    let combine = module
        .entry_points
        .iter()
        .find(|ep| ep.name == "reduce_combine")
        .unwrap();
    assert_eq!(combine.workgroup_size, [256, 1, 1]);
}

#[test]
fn image_kernel_parses() {
    let module = naga::front::wgsl::parse_str(include_str!("../../../shaders/tint.wgsl"))
        .expect("tint.wgsl must parse");
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(module.entry_points[0].name, "tint");
}
