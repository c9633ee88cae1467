use d3dfx_effect::builder::{standalone_preshader, token_bytes, EffectBuilder, PassDesc};
use d3dfx_effect::{
    parse_effect, parse_effect_with_cache, EffectApiError, EffectError, EffectOptions, ObjectData,
    RenderStateType, SamplerStateRegister, SamplerStateType,
};
use d3dfx_shader::ctab::builder::{build as build_ctab, CtabConstant};
use d3dfx_shader::preshader::builder::{build as build_preshader, Inst, Op};
use d3dfx_shader::preshader::PreshaderOpcode;
use d3dfx_shader::{
    Profile, ShaderCache, ShaderCacheLookupSource, SymbolClass, SymbolRegisterSet, SymbolType,
    SymbolTypeInfo, TranslateOptions,
};
use pretty_assertions::assert_eq;

const END: u32 = 0x0000_FFFF;

fn opcode_token(op: u16, operand_tokens: u8) -> u32 {
    (op as u32) | ((operand_tokens as u32) << 24)
}

fn reg_token(regtype: u8, index: u32) -> u32 {
    let low3 = (regtype as u32) & 0x7;
    let high2 = (regtype as u32) & 0x18;
    0x8000_0000 | (low3 << 28) | (high2 << 8) | (index & 0x7FF)
}

fn dst_token(regtype: u8, index: u32, mask: u8) -> u32 {
    reg_token(regtype, index) | ((mask as u32) << 16)
}

fn src_token(regtype: u8, index: u32) -> u32 {
    reg_token(regtype, index) | (0xE4 << 16)
}

fn comment(payload: &[u32]) -> Vec<u32> {
    let mut out = vec![0xFFFE | ((payload.len() as u32) << 16)];
    out.extend_from_slice(payload);
    out
}

fn info(class: SymbolClass, ty: SymbolType, rows: u32, columns: u32) -> SymbolTypeInfo {
    SymbolTypeInfo {
        class,
        ty,
        rows,
        columns,
        elements: 1,
        members: Vec::new(),
    }
}

fn float4_constant(name: &str, register_index: u16) -> CtabConstant<'_> {
    CtabConstant {
        name,
        register_set: SymbolRegisterSet::Float4,
        register_index,
        register_count: 1,
        info: info(SymbolClass::Vector, SymbolType::Float, 1, 4),
    }
}

/// vs_2_0 with a CTAB naming `matrix`: dcl_position v0 ; m4x4 oPos, v0, c0
fn transform_vs(matrix: &str) -> Vec<u8> {
    let ctab = build_ctab(&[CtabConstant {
        name: matrix,
        register_set: SymbolRegisterSet::Float4,
        register_index: 0,
        register_count: 4,
        info: info(SymbolClass::MatrixRows, SymbolType::Float, 4, 4),
    }]);
    let mut tokens = vec![0xFFFE_0200];
    tokens.extend(comment(&ctab));
    tokens.extend([
        opcode_token(31, 2),
        0x8000_0000,
        dst_token(1, 0, 0xF),
        opcode_token(20, 3),
        dst_token(4, 0, 0xF),
        src_token(1, 0),
        src_token(2, 0),
        END,
    ]);
    token_bytes(&tokens)
}

/// ps_2_0 sampling `Diffuse` (s0) tinted by `Tint` (c0).
fn textured_ps() -> Vec<u8> {
    let ctab = build_ctab(&[
        float4_constant("Tint", 0),
        CtabConstant {
            name: "Diffuse",
            register_set: SymbolRegisterSet::Sampler,
            register_index: 0,
            register_count: 1,
            info: info(SymbolClass::Object, SymbolType::Sampler2D, 1, 1),
        },
    ]);
    let mut tokens = vec![0xFFFF_0200];
    tokens.extend(comment(&ctab));
    tokens.extend([
        opcode_token(31, 2),
        0x8000_0000,
        dst_token(3, 0, 0x3),
        opcode_token(31, 2),
        0x8000_0000 | (2 << 27),
        dst_token(10, 0, 0xF),
        opcode_token(66, 3),
        dst_token(0, 0, 0xF),
        src_token(3, 0),
        src_token(10, 0),
        opcode_token(5, 3),
        dst_token(0, 0, 0xF),
        src_token(0, 0),
        src_token(2, 0),
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(0, 0),
        END,
    ]);
    token_bytes(&tokens)
}

/// ps_2_0: mov oC0, c0
fn flat_ps() -> Vec<u8> {
    token_bytes(&[
        0xFFFF_0200,
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(2, 0),
        END,
    ])
}

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// A textured-and-tinted effect exercising every parameter kind:
///
/// objects: 0 annotation string, 1 texture, 2 sampler texture, 3 vertex shader, 4 pixel shader
fn textured_effect() -> EffectBuilder {
    let mut b = EffectBuilder::new();
    b.objects(5);

    let wvp = b.float_value("WorldViewProj", 4, 4, &IDENTITY);
    let wvp = b.param(wvp);
    let ui_name = b.object_value(SymbolType::String, "UIName", &[0]);
    b.annotate(wvp, ui_name);

    let tint = b.float_value("Tint", 1, 4, &[1.0, 0.5, 0.25, 1.0]);
    b.param(tint);

    let texture = b.object_value(SymbolType::Texture2D, "DiffuseTexture", &[1]);
    b.param(texture);

    let texture_ref = b.object_value(SymbolType::Texture, "", &[2]);
    let linear = b.int_value(2);
    let sampler = b.sampler_value(
        SymbolType::Sampler2D,
        "Diffuse",
        &[
            (SamplerStateType::Texture.raw(), texture_ref),
            (SamplerStateType::MinFilter.raw() | 0xA0, linear),
        ],
    );
    b.param(sampler);

    let material = b.struct_value(
        "Material",
        &[("Diffuse", 1, 4), ("Power", 1, 1)],
        &[0.8, 0.7, 0.6, 1.0, 16.0],
    );
    b.param(material);

    let vs = b.object_value(SymbolType::VertexShader, "", &[3]);
    let ps = b.object_value(SymbolType::PixelShader, "", &[4]);
    let cull = b.int_value(1);
    b.technique(
        "Textured",
        vec![PassDesc {
            name: "P0",
            states: vec![
                (RenderStateType::VertexShader.raw(), vs),
                (RenderStateType::PixelShader.raw(), ps),
                (RenderStateType::CullMode.raw(), cull),
            ],
        }],
    );

    b.small_object(0, b"Transform\0".to_vec())
        .small_object(2, b"DiffuseTexture\0".to_vec())
        .small_object(3, transform_vs("WorldViewProj"))
        .small_object(4, textured_ps());
    b
}

/// One technique with passes `P0`, `P1` and a second technique `Fallback`, no shaders.
fn two_technique_effect() -> Vec<u8> {
    let mut b = EffectBuilder::new();
    let tint = b.float_value("Tint", 1, 4, &[1.0, 1.0, 1.0, 1.0]);
    b.param(tint);
    let pass = |name| PassDesc {
        name,
        states: Vec::new(),
    };
    b.technique("Main", vec![pass("P0"), pass("P1")]);
    b.technique("Fallback", vec![pass("P0")]);
    b.build()
}

#[test]
fn short_input_is_eof_and_wrong_magic_is_rejected() {
    assert_eq!(
        parse_effect(&[1, 9, 0xFF], &EffectOptions::default()),
        Err(EffectError::UnexpectedEof("effect header"))
    );
    assert_eq!(
        parse_effect(&[0u8; 16], &EffectOptions::default()),
        Err(EffectError::NotAnEffectsFile)
    );
}

#[test]
fn parameters_annotations_and_objects_are_read() {
    let effect = parse_effect(&textured_effect().build(), &EffectOptions::default()).unwrap();
    assert!(effect.errors.is_empty(), "{:?}", effect.errors);
    assert_eq!(effect.params.len(), 5);

    let wvp = effect.param("WorldViewProj").unwrap();
    assert_eq!(wvp.value.class(), SymbolClass::MatrixRows);
    assert_eq!(wvp.value.info.rows, 4);
    assert_eq!(wvp.value.floats().unwrap(), &IDENTITY);
    let ui_name = &wvp.annotations[0];
    assert_eq!(ui_name.name.as_deref(), Some("UIName"));
    assert_eq!(ui_name.objects().unwrap(), &[0]);
    assert_eq!(effect.objects[0].ty, SymbolType::String);
    assert_eq!(effect.objects[0].data, ObjectData::String("Transform".to_owned()));

    let tint = effect.param("Tint").unwrap();
    assert_eq!(tint.value.floats().unwrap(), &[1.0, 0.5, 0.25, 1.0]);

    assert_eq!(effect.objects[1].ty, SymbolType::Texture2D);
    assert_eq!(effect.objects[1].data, ObjectData::None);
}

#[test]
fn sampler_texture_state_types_its_object_with_the_sampler_type() {
    let effect = parse_effect(&textured_effect().build(), &EffectOptions::default()).unwrap();

    let sampler = effect.param("Diffuse").unwrap();
    let states = sampler.value.sampler_states().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].ty(), Some(SamplerStateType::Texture));
    // Flag bits on the state number are dropped.
    assert_eq!(states[1].ty(), Some(SamplerStateType::MinFilter));
    assert_eq!(states[1].value.ints().unwrap()[0], 2);

    assert_eq!(effect.objects[2].ty, SymbolType::Sampler2D);
    assert_eq!(effect.objects[2].data, ObjectData::Mapping("DiffuseTexture".to_owned()));
}

#[test]
fn struct_members_are_packed_one_register_per_row() {
    let effect = parse_effect(&textured_effect().build(), &EffectOptions::default()).unwrap();

    let material = &effect.param("Material").unwrap().value;
    assert_eq!(material.class(), SymbolClass::Struct);
    let members: Vec<_> = material.info.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(members, ["Diffuse", "Power"]);
    assert_eq!(material.info.members[1].info.columns, 1);
    assert_eq!(material.info.rows, 1);
    assert_eq!(material.info.columns, 8);
    assert_eq!(
        material.floats().unwrap(),
        &[0.8, 0.7, 0.6, 1.0, 16.0, 0.0, 0.0, 0.0]
    );
}

#[test]
fn shaders_are_translated_and_linked_to_their_parameters() {
    let effect = parse_effect(&textured_effect().build(), &EffectOptions::default()).unwrap();

    let technique = effect.current_technique().unwrap();
    assert_eq!(technique.name.as_deref(), Some("Textured"));
    let pass = &technique.passes[0];
    let types: Vec<_> = pass.states.iter().map(|s| s.ty()).collect();
    assert_eq!(
        types,
        [
            Some(RenderStateType::VertexShader),
            Some(RenderStateType::PixelShader),
            Some(RenderStateType::CullMode),
        ]
    );

    let vs = effect.objects[3].shader().unwrap();
    assert_eq!(effect.objects[3].ty, SymbolType::VertexShader);
    assert_eq!((vs.technique, vs.pass), (None, None));
    assert_eq!(vs.params, [0]);
    let glsl = &vs.parse_data().unwrap().output;
    assert!(glsl.contains("void ShaderFunction3()"), "{glsl}");
    assert!(glsl.ends_with("void main()\n{\n    ShaderFunction3();\n}\n"), "{glsl}");

    let ps = effect.objects[4].shader().unwrap();
    assert_eq!(ps.params, [1, 3]);
    assert_eq!(
        ps.samplers,
        [SamplerStateRegister {
            name: "Diffuse".to_owned(),
            register: 0,
            param: 3,
        }]
    );
    assert_eq!(effect.sampler_states(&ps.samplers[0]).len(), 2);
    assert!(ps.preshader_params.is_empty());
}

#[test]
fn arb1_effects_translate_to_assembly() {
    let effect = parse_effect(&textured_effect().build(), &EffectOptions::new(Profile::Arb1))
        .unwrap();
    assert_eq!(effect.profile, Profile::Arb1);
    let vs = effect.objects[3].shader().unwrap().parse_data().unwrap();
    assert!(vs.output.starts_with("!!ARBvp1.0"), "{}", vs.output);
}

#[test]
fn xna_preamble_is_skipped() {
    let builder = textured_effect();
    let plain = parse_effect(&builder.build(), &EffectOptions::default()).unwrap();
    let xna = parse_effect(&builder.build_xna(12), &EffectOptions::default()).unwrap();
    assert_eq!(xna, plain);
}

#[test]
fn shared_cache_reuses_translations_across_loads() {
    let bytes = textured_effect().build();
    let options = EffectOptions::default();
    let mut cache = ShaderCache::new();
    let first = parse_effect_with_cache(&bytes, &options, &mut cache).unwrap();
    let second = parse_effect_with_cache(&bytes, &options, &mut cache).unwrap();
    assert_eq!(first, second);

    let translate = TranslateOptions {
        mainfn: "ShaderFunction3".to_owned(),
        ..TranslateOptions::default()
    };
    let lookup = cache.get_or_translate(Profile::Glsl, &transform_vs("WorldViewProj"), &translate);
    assert_eq!(lookup.source, ShaderCacheLookupSource::Memory);
}

#[test]
fn standalone_preshader_selects_from_a_shader_array() {
    let mut b = EffectBuilder::new();
    b.objects(3);
    let shaders = b.object_value(SymbolType::PixelShader, "Shaders", &[0, 1]);
    b.param(shaders);
    let index = b.float_value("Index", 1, 1, &[1.0]);
    b.param(index);
    let selected = b.object_value(SymbolType::PixelShader, "", &[2]);
    b.technique(
        "Select",
        vec![PassDesc {
            name: "P0",
            states: vec![(RenderStateType::PixelShader.raw(), selected)],
        }],
    );
    b.small_object(0, flat_ps()).small_object(1, flat_ps());

    let ctab = build_ctab(&[float4_constant("Index", 0)]);
    let tokens = build_preshader(
        &ctab,
        &[],
        &[Inst {
            opcode: PreshaderOpcode::Mov,
            elements: 1,
            operands: vec![Op::input(0), Op::output(0)],
        }],
        &[],
    );
    b.large_object(0, 0, 0, 2, standalone_preshader("Shaders", &tokens));

    let effect = parse_effect(&b.build(), &EffectOptions::default()).unwrap();
    assert_eq!(effect.objects[2].ty, SymbolType::PixelShader);
    let selector = effect.objects[2].shader().unwrap();
    assert!(selector.is_preshader());
    assert!(selector.parse_data().is_none());
    assert_eq!((selector.technique, selector.pass), (Some(0), Some(0)));
    assert_eq!(selector.params, [0]);
    assert_eq!(selector.preshader_params, [1]);

    let mut preshader = selector.preshader().unwrap().clone();
    preshader.registers[0] = 1.0;
    let mut out = [0.0f32; 4];
    preshader.run(&mut out).unwrap();
    assert_eq!(out[0], 1.0);
}

#[test]
fn broken_standalone_preshader_fails_the_effect() {
    let mut b = EffectBuilder::new();
    b.objects(1);
    let shaders = b.object_value(SymbolType::PixelShader, "Shaders", &[0]);
    b.param(shaders);
    let selected = b.object_value(SymbolType::PixelShader, "", &[0]);
    b.technique(
        "Select",
        vec![PassDesc {
            name: "P0",
            states: vec![(RenderStateType::PixelShader.raw(), selected)],
        }],
    );
    b.large_object(0, 0, 0, 2, standalone_preshader("Shaders", &[0xDEAD_BEEF]));

    let err = parse_effect(&b.build(), &EffectOptions::default()).unwrap_err();
    assert!(matches!(err, EffectError::Preshader(_)), "{err:?}");
}

#[test]
fn large_object_of_untyped_object_is_skipped() {
    let mut b = EffectBuilder::new();
    b.objects(6);
    let unused = b.int_value(5);
    b.technique(
        "Main",
        vec![PassDesc {
            name: "P0",
            states: vec![(RenderStateType::ZEnable.raw(), unused)],
        }],
    );
    b.large_object(0, 0, 0, 0, vec![1, 2, 3, 4, 5]);

    let effect = parse_effect(&b.build(), &EffectOptions::default()).unwrap();
    assert_eq!(effect.objects[5].ty, SymbolType::Void);
    assert_eq!(effect.objects[5].data, ObjectData::None);
}

#[test]
fn object_references_are_bounds_checked() {
    let mut b = EffectBuilder::new();
    b.objects(2);
    let vs = b.object_value(SymbolType::VertexShader, "Shader", &[7]);
    b.param(vs);
    assert_eq!(
        parse_effect(&b.build(), &EffectOptions::default()),
        Err(EffectError::BadObjectIndex { index: 7, count: 2 })
    );

    let mut b = EffectBuilder::new();
    b.objects(1 << 20);
    assert!(matches!(
        parse_effect(&b.build(), &EffectOptions::default()),
        Err(EffectError::OutOfMemory(_))
    ));
}

#[test]
fn shader_constant_without_a_parameter_is_an_error() {
    let mut b = EffectBuilder::new();
    b.objects(1);
    let vs = b.object_value(SymbolType::VertexShader, "", &[0]);
    b.technique(
        "Main",
        vec![PassDesc {
            name: "P0",
            states: vec![(RenderStateType::VertexShader.raw(), vs)],
        }],
    );
    b.small_object(0, transform_vs("Missing"));

    assert_eq!(
        parse_effect(&b.build(), &EffectOptions::default()),
        Err(EffectError::ParameterNotFound("Missing".to_owned()))
    );
}

#[test]
fn untranslatable_shader_is_reported_but_not_fatal() {
    let mut b = EffectBuilder::new();
    b.objects(1);
    let ps = b.object_value(SymbolType::PixelShader, "", &[0]);
    b.technique(
        "Main",
        vec![PassDesc {
            name: "P0",
            states: vec![(RenderStateType::PixelShader.raw(), ps)],
        }],
    );
    b.small_object(0, token_bytes(&[0x1234_5678, END]));

    let effect = parse_effect(&b.build(), &EffectOptions::default()).unwrap();
    assert!(!effect.errors.is_empty());
    let shader = effect.objects[0].shader().unwrap();
    assert!(!shader.parse_data().unwrap().is_ok());
}

#[test]
fn raw_values_are_written_in_place_and_bounds_checked() {
    let mut effect = parse_effect(&textured_effect().build(), &EffectOptions::default()).unwrap();

    effect
        .set_raw_value_name("Tint", &2.0f32.to_le_bytes(), 4)
        .unwrap();
    assert_eq!(
        effect.param("Tint").unwrap().value.floats().unwrap(),
        &[1.0, 2.0, 0.25, 1.0]
    );

    assert_eq!(
        effect.set_raw_value_handle(1, &[0; 4], 14),
        Err(EffectApiError::ValueOverflow {
            offset: 14,
            len: 4,
            size: 16,
        })
    );
    assert_eq!(
        effect.set_raw_value_handle(9, &[0; 4], 0),
        Err(EffectApiError::ParameterOutOfRange { index: 9, count: 5 })
    );
    assert_eq!(
        effect.set_raw_value_name("Nope", &[0; 4], 0),
        Err(EffectApiError::UnknownParameter("Nope".to_owned()))
    );
    assert!(matches!(
        effect.set_raw_value_name("Diffuse", &[0; 4], 0),
        Err(EffectApiError::WrongValueKind { .. })
    ));
}

#[test]
fn techniques_iterate_in_file_order() {
    let mut effect = parse_effect(&two_technique_effect(), &EffectOptions::default()).unwrap();
    assert_eq!(effect.current_technique_index(), Some(0));

    let mut names = Vec::new();
    let mut next = effect.find_next_valid_technique(None);
    while let Some(index) = next {
        names.push(effect.techniques[index].name.clone().unwrap());
        next = effect.find_next_valid_technique(Some(index));
    }
    assert_eq!(names, ["Main", "Fallback"]);

    effect.set_technique(1).unwrap();
    assert_eq!(effect.pass_count(), 1);
    assert_eq!(
        effect.set_technique(2),
        Err(EffectApiError::TechniqueOutOfRange { index: 2, count: 2 })
    );
    assert_eq!(effect.current_technique_index(), Some(1));
}

#[test]
fn pass_cursor_enforces_begin_end_order() {
    let mut effect = parse_effect(&two_technique_effect(), &EffectOptions::default()).unwrap();
    assert_eq!(effect.pass_count(), 2);
    assert_eq!(
        effect.begin_pass(2).unwrap_err(),
        EffectApiError::PassOutOfRange { pass: 2, count: 2 }
    );

    let pass = effect.begin_pass(1).unwrap();
    assert_eq!(pass.name.as_deref(), Some("P1"));
    assert_eq!(effect.current_pass_index(), Some(1));
    assert_eq!(effect.begin_pass(0).unwrap_err(), EffectApiError::PassActive(1));

    effect.end_pass().unwrap();
    assert_eq!(effect.current_pass(), None);
    assert_eq!(effect.end_pass(), Err(EffectApiError::NoActivePass));
}

#[test]
fn clone_starts_outside_any_pass() {
    let mut effect = parse_effect(&two_technique_effect(), &EffectOptions::default()).unwrap();
    effect.set_technique(1).unwrap();
    effect.begin_pass(0).unwrap();

    let copy = effect.clone();
    assert_eq!(copy.current_technique_index(), Some(1));
    assert_eq!(copy.current_pass_index(), None);
    assert_ne!(copy, effect);

    effect.end_pass().unwrap();
    assert_eq!(copy, effect);

    let mut edited = copy.clone();
    edited
        .set_raw_value_name("Tint", &0.5f32.to_le_bytes(), 8)
        .unwrap();
    assert_eq!(
        edited.param("Tint").unwrap().value.floats().unwrap(),
        &[1.0, 1.0, 0.5, 1.0]
    );
    assert_eq!(
        copy.param("Tint").unwrap().value.floats().unwrap(),
        &[1.0, 1.0, 1.0, 1.0]
    );
    assert_ne!(edited, copy);
}

#[test]
fn effect_without_techniques_has_no_pass_to_begin() {
    let mut b = EffectBuilder::new();
    let tint = b.float_value("Tint", 1, 4, &[0.0; 4]);
    b.param(tint);
    let mut effect = parse_effect(&b.build(), &EffectOptions::default()).unwrap();
    assert_eq!(effect.current_technique_index(), None);
    assert_eq!(effect.pass_count(), 0);
    assert_eq!(effect.begin_pass(0).unwrap_err(), EffectApiError::NoTechnique);
}
