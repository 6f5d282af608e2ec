use std::{sync::Arc, thread};

use chain_forge_glsl::compiler::{
    Binding, Chain, ChainError, CompileError, OperationDescriptor, Registry, ShaderOptions,
    SharedRegistry, ValueType, build_program, compile,
};

fn flat_color(name: &str) -> OperationDescriptor {
    OperationDescriptor::new(name, "src", "return vec4(red, green, blue, alpha);")
        .param("red", "float", Some(1.0))
        .param("green", "float", Some(1.0))
        .param("blue", "float", Some(1.0))
        .param("alpha", "float", Some(1.0))
}

fn scenario_registry() -> Arc<Registry> {
    Arc::new(Registry::from_descriptors(&[
        flat_color("flatColor"),
        flat_color("flatColor2"),
        OperationDescriptor::new("invert", "color", "return vec4(1.0 - _c0.rgb, _c0.a);"),
        OperationDescriptor::new("blend", "combine", "return mix(_c0, _c1, amount);")
            .param("amount", "float", Some(0.5)),
        OperationDescriptor::new("brightness", "color", "return vec4(_c0.rgb + vec3(amount), _c0.a);")
            .param("amount", "float", Some(0.0)),
    ]))
}

#[test]
fn scenario_a_single_source() {
    let reg = scenario_registry();
    let chain = Chain::root(&reg, "flatColor", [1.into(), 0.into(), 0.into(), 1.into()])
        .expect("flatColor root");
    let out = compile(&reg, &chain, ValueType::Vec4).expect("compile");
    assert_eq!(out.body, "flatColor(st, 1.0, 0.0, 0.0, 1.0)");
    assert!(out.parameters.is_empty());
    assert_eq!(out.function_names(), vec!["flatColor"]);
}

#[test]
fn scenario_b_source_then_color() {
    let reg = scenario_registry();
    let mut chain = Chain::root(&reg, "flatColor", []).expect("root");
    chain.then("invert", []).expect("invert");
    let out = compile(&reg, &chain, ValueType::Vec4).expect("compile");
    assert_eq!(out.body, "invert(flatColor(st, 1.0, 1.0, 1.0, 1.0))");
    assert_eq!(out.function_names(), vec!["flatColor", "invert"]);
}

#[test]
fn scenario_c_combine_with_nested_chain() {
    let reg = scenario_registry();
    let other = Chain::root(&reg, "flatColor2", [0.5.into()]).expect("operand");
    let mut chain = Chain::root(&reg, "flatColor", []).expect("root");
    chain.then("blend", [other.into(), 0.3.into()]).expect("blend");
    let out = compile(&reg, &chain, ValueType::Vec4).expect("compile");
    assert_eq!(
        out.body,
        "blend(flatColor(st, 1.0, 1.0, 1.0, 1.0), flatColor2(st, 0.5, 1.0, 1.0, 1.0), 0.3)"
    );
    assert_eq!(out.function_names(), vec!["flatColor", "blend", "flatColor2"]);
}

#[test]
fn scenario_d_wide_chain_into_scalar_parameter() {
    let reg = scenario_registry();
    let amount = Chain::root(&reg, "flatColor2", []).expect("amount chain");
    let mut chain = Chain::root(&reg, "flatColor", []).expect("root");
    chain.then("brightness", [amount.into()]).expect("brightness");
    let out = compile(&reg, &chain, ValueType::Vec4).expect("compile");
    assert_eq!(
        out.body,
        "brightness(flatColor(st, 1.0, 1.0, 1.0, 1.0), flatColor2(st, 1.0, 1.0, 1.0, 1.0).x)"
    );
}

#[test]
fn source_mid_chain_is_rejected_with_context() {
    let reg = scenario_registry();
    let mut chain = Chain::root(&reg, "flatColor", []).expect("root");
    chain.then("invert", []).expect("invert");
    let err = chain.then("flatColor2", []).unwrap_err();
    assert!(matches!(err, ChainError::InvalidPosition { position: 2, .. }));
    let msg = err.to_string();
    assert!(msg.contains("flatColor2") && msg.contains("invert"), "{msg}");
}

#[test]
fn compile_uses_the_snapshot_it_is_given() {
    let shared = SharedRegistry::new(Registry::from_descriptors(&[
        flat_color("flatColor"),
        OperationDescriptor::new("invert", "color", "return vec4(1.0 - _c0.rgb, _c0.a);"),
    ]));
    let before = shared.snapshot();
    let mut chain = Chain::root(&before, "flatColor", []).expect("root");
    chain.then("invert", []).expect("invert");

    shared.reinitialize(&[flat_color("flatColor")]);
    let after = shared.snapshot();

    assert!(compile(&before, &chain, ValueType::Vec4).is_ok());
    let err = compile(&after, &chain, ValueType::Vec4).unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnknownOperation { ref name, position: 1, .. } if name == "invert"
    ));
}

#[test]
fn concurrent_compiles_agree_while_registry_is_swapped() {
    let shared = Arc::new(SharedRegistry::new(Registry::with_builtins()));
    let snapshot = shared.snapshot();
    let mut chain = Chain::root(&snapshot, "osc", [Binding::constant_uniform(30.0)]).expect("osc");
    chain
        .then("rotate", [0.2.into()])
        .expect("rotate")
        .then("modulate", [Chain::root(&snapshot, "noise", []).expect("noise").into()])
        .expect("modulate");
    let chain = Arc::new(chain);
    let expected = build_program(&snapshot, &chain, &ShaderOptions::default())
        .expect("build")
        .fragment;

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            let chain = chain.clone();
            thread::spawn(move || {
                let reg = shared.snapshot();
                build_program(&reg, &chain, &ShaderOptions::default())
                    .map(|p| p.fragment)
            })
        })
        .collect();
    shared.reinitialize(chain_forge_glsl::schema::builtin_descriptors());

    for worker in workers {
        let fragment = worker
            .join()
            .expect("worker panicked")
            .expect("compile against a builtin snapshot");
        assert_eq!(fragment, expected);
    }
}

#[test]
fn texture_parameter_requires_a_texture() {
    let reg = Arc::new(Registry::with_builtins());
    let mut chain = Chain::root(&reg, "src", [0.5.into()]).expect("src root accepts any binding");
    chain.then("invert", []).expect("invert");
    assert!(matches!(
        compile(&reg, &chain, ValueType::Vec4),
        Err(CompileError::TypeMismatch { position: 0, .. })
    ));

    let missing = Chain::root(&reg, "src", []).expect("src root");
    assert!(matches!(
        compile(&reg, &missing, ValueType::Vec4),
        Err(CompileError::MissingArgument { .. })
    ));
}
