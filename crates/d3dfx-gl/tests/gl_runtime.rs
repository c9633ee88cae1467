use std::rc::Rc;

use d3dfx_effect::builder::{standalone_preshader, token_bytes, EffectBuilder, PassDesc};
use d3dfx_effect::{parse_effect, EffectOptions, RenderStateType, SamplerStateType};
use d3dfx_gl::testing::{Call, RecordingGl};
use d3dfx_gl::{
    available_profiles, best_profile, gl, GlContext, GlContextConfig, GlEffect, GlError,
    VertexAttributeType,
};
use d3dfx_shader::ctab::builder::{build as build_ctab, CtabConstant};
use d3dfx_shader::preshader::builder::{build as build_preshader, Inst, Op};
use d3dfx_shader::preshader::PreshaderOpcode;
use d3dfx_shader::{
    parse, Profile, ShaderStage, SymbolClass, SymbolRegisterSet, SymbolType, SymbolTypeInfo,
    TranslateOptions, Usage,
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

fn dcl_usage(usage: u32, index: u32) -> u32 {
    0x8000_0000 | usage | (index << 16)
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

fn float4_constant(name: &str, register_index: u16, register_count: u16) -> CtabConstant<'_> {
    CtabConstant {
        name,
        register_set: SymbolRegisterSet::Float4,
        register_index,
        register_count,
        info: info(SymbolClass::Vector, SymbolType::Float, 1, 4),
    }
}

/// vs_2_0: dcl_position v0 ; add oPos, v0, c2
fn offset_vs() -> Vec<u8> {
    token_bytes(&[
        0xFFFE_0200,
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(2, 3),
        dst_token(4, 0, 0xF),
        src_token(1, 0),
        src_token(2, 2),
        END,
    ])
}

/// vs_2_0: dcl_position v0 ; mov oPos, v0 ; mov oPts.x, c0
fn point_vs() -> Vec<u8> {
    token_bytes(&[
        0xFFFE_0200,
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(1, 2),
        dst_token(4, 0, 0xF),
        src_token(1, 0),
        opcode_token(1, 2),
        dst_token(4, 2, 0x1),
        src_token(2, 0),
        END,
    ])
}

/// ps_2_0: mov oC0, c1
fn tint_ps() -> Vec<u8> {
    token_bytes(&[
        0xFFFF_0200,
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(2, 1),
        END,
    ])
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

/// ps_1_1: tex t0 ; texbem t1, t0 ; mov r0, t1
fn bump_ps() -> Vec<u8> {
    token_bytes(&[
        0xFFFF_0101,
        66,
        dst_token(3, 0, 0xF),
        67,
        dst_token(3, 1, 0xF),
        src_token(3, 0),
        1,
        dst_token(0, 0, 0xF),
        src_token(3, 1),
        END,
    ])
}

/// vs_3_0 summing the `def`-initialised `Table` (c0..c1) through `c0[aL]`.
fn table_vs() -> Vec<u8> {
    let ctab = build_ctab(&[float4_constant("Table", 0, 2)]);
    let mut tokens = vec![0xFFFE_0300];
    tokens.extend(comment(&ctab));
    tokens.extend([
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(6, 0, 0xF),
        // def c0, 1, 2, 3, 4 ; def c1, 5, 6, 7, 8
        opcode_token(81, 5),
        dst_token(2, 0, 0xF),
        1.0f32.to_bits(),
        2.0f32.to_bits(),
        3.0f32.to_bits(),
        4.0f32.to_bits(),
        opcode_token(81, 5),
        dst_token(2, 1, 0xF),
        5.0f32.to_bits(),
        6.0f32.to_bits(),
        7.0f32.to_bits(),
        8.0f32.to_bits(),
        // defi i0, 2, 0, 1, 0
        opcode_token(48, 5),
        dst_token(7, 0, 0xF),
        2,
        0,
        1,
        0,
        opcode_token(1, 2),
        dst_token(0, 0, 0xF),
        src_token(1, 0),
        // loop aL, i0 ; add r0, r0, c0[aL] ; endloop
        opcode_token(27, 2),
        src_token(15, 0),
        src_token(7, 0),
        opcode_token(2, 4),
        dst_token(0, 0, 0xF),
        src_token(0, 0),
        src_token(2, 0) | 0x2000,
        reg_token(15, 0),
        opcode_token(29, 0),
        opcode_token(1, 2),
        dst_token(6, 0, 0xF),
        src_token(0, 0),
        END,
    ]);
    token_bytes(&tokens)
}

/// vs_3_0 displacing by a vertex texture: texldl r0, v0, s0
fn fetch_vs() -> Vec<u8> {
    token_bytes(&[
        0xFFFE_0300,
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(6, 0, 0xF),
        opcode_token(31, 2),
        0x8000_0000 | (2 << 27),
        dst_token(10, 0, 0xF),
        opcode_token(95, 3),
        dst_token(0, 0, 0xF),
        src_token(1, 0),
        src_token(10, 0),
        opcode_token(1, 2),
        dst_token(6, 0, 0xF),
        src_token(0, 0),
        END,
    ])
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
        float4_constant("Tint", 0, 1),
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

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

fn float_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A driver where the runtime's uniform arrays and `vs_v0` all resolve.
fn glsl_driver() -> RecordingGl {
    RecordingGl::gl2()
        .with_uniform("vs_uniforms_vec4", 0)
        .with_uniform("ps_uniforms_vec4", 1)
        .with_uniform("ps_s0", 2)
        .with_attrib("vs_v0", 3)
}

fn glsl_context(api: RecordingGl) -> GlContext<RecordingGl> {
    GlContext::new(api, GlContextConfig::new(Profile::Glsl)).unwrap()
}

fn compile(ctx: &mut GlContext<RecordingGl>, bytes: &[u8]) -> Rc<d3dfx_gl::GlShader> {
    ctx.compile_shader(bytes, &TranslateOptions::default()).unwrap()
}

fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

#[test]
fn best_profile_follows_driver_capabilities() {
    assert_eq!(best_profile(&mut RecordingGl::gl2()).unwrap(), Profile::Glsl120);
    assert_eq!(best_profile(&mut RecordingGl::modern()).unwrap(), Profile::Glsl120);
    assert_eq!(best_profile(&mut RecordingGl::arb()).unwrap(), Profile::Arb1);
    assert_eq!(
        best_profile(&mut RecordingGl::new("1.1", None, &[])),
        Err(GlError::NoProfiles)
    );
    assert_eq!(
        best_profile(&mut RecordingGl::new("", None, &[])),
        Err(GlError::NoProfiles)
    );
}

#[test]
fn glsl_1_00_drivers_fall_back_to_assembly() {
    let glsl_100 = &[
        "GL_ARB_shader_objects",
        "GL_ARB_vertex_shader",
        "GL_ARB_fragment_shader",
        "GL_ARB_shading_language_100",
    ];
    let mut api = RecordingGl::new("1.5", Some("1.00"), glsl_100);
    assert_eq!(available_profiles(&mut api).unwrap(), Vec::<Profile>::new());

    let mut with_arb: Vec<&str> = glsl_100.to_vec();
    with_arb.extend(["GL_ARB_vertex_program", "GL_ARB_fragment_program"]);
    let mut api = RecordingGl::new("1.5", Some("1.00"), &with_arb);
    assert_eq!(best_profile(&mut api).unwrap(), Profile::Arb1);

    let err = GlContext::new(
        RecordingGl::new("1.5", Some("1.00"), glsl_100),
        GlContextConfig::new(Profile::Glsl),
    )
    .unwrap_err();
    assert!(matches!(err, GlError::ProfileNeeds { profile: Profile::Glsl, .. }));
}

#[test]
fn context_rejects_profiles_the_driver_lacks() {
    let err = GlContext::new(RecordingGl::arb(), GlContextConfig::default()).unwrap_err();
    assert_eq!(
        err,
        GlError::ProfileNeeds {
            profile: Profile::Glsl,
            requirement: "missing GLSL support",
        }
    );
    assert!(matches!(
        GlContextConfig::from_profile_name("hlsl"),
        Err(GlError::UnknownProfile(_))
    ));
    assert_eq!(
        GlContextConfig::from_profile_name("nv2").unwrap().profile,
        Profile::Nv2
    );
}

#[test]
fn contexts_debug_print_their_state() {
    let ctx = glsl_context(glsl_driver());
    let debug = format!("{ctx:?}");
    assert!(debug.starts_with("GlContext {"), "{debug}");
    assert!(debug.contains("profile: Glsl,"), "{debug}");
    assert!(debug.contains("bound_program: None"), "{debug}");
    assert!(debug.contains("linked_programs: 0"), "{debug}");
}

#[test]
fn linked_programs_are_cached_per_shader_pair() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());
    ctx.api_mut().take_calls();

    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();
    let program = ctx.bound_program().unwrap().clone();
    ctx.bind_shaders(None, None).unwrap();
    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();

    let calls = ctx.api_mut().take_calls();
    assert_eq!(count(&calls, |c| matches!(c, Call::CreateProgram(_))), 1);
    assert!(Rc::ptr_eq(ctx.bound_program().unwrap(), &program));
    assert!(Rc::ptr_eq(ctx.cached_program(Some(&vs), Some(&ps)).unwrap(), &program));
    assert!(ctx.cached_program(Some(&vs), None).is_none());
    assert_eq!(program.handles().vertex, vs.handle());
    assert_eq!(program.handles().pixel, ps.handle());
    assert_eq!(program.attrib_location(Usage::Position, 0), 3);
}

#[test]
fn uniforms_upload_only_when_registers_change() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());
    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();
    ctx.api_mut().take_calls();

    ctx.set_uniform_f(ShaderStage::Vertex, 2, &[1.0, 2.0, 3.0, 4.0]);
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::Uniform4fv(0, vec![1.0, 2.0, 3.0, 4.0]),
            Call::Uniform4fv(1, vec![0.0; 4]),
        ]
    );

    // Nothing written, then a write of identical values, then a register no shader reads.
    ctx.program_ready();
    ctx.set_uniform_f(ShaderStage::Vertex, 2, &[1.0, 2.0, 3.0, 4.0]);
    ctx.program_ready();
    ctx.set_uniform_f(ShaderStage::Vertex, 5, &[9.0; 4]);
    ctx.program_ready();
    assert_eq!(ctx.api_mut().take_calls(), vec![]);

    ctx.set_uniform_f(ShaderStage::Pixel, 1, &[0.5, 0.5, 0.5, 1.0]);
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::Uniform4fv(0, vec![1.0, 2.0, 3.0, 4.0]),
            Call::Uniform4fv(1, vec![0.5, 0.5, 0.5, 1.0]),
        ]
    );
    let bound = ctx.bound_program().unwrap();
    assert_eq!(
        bound.uniform_values(ShaderStage::Pixel).float4,
        vec![0.5, 0.5, 0.5, 1.0]
    );
}

#[test]
fn register_files_clamp_and_normalise() {
    let mut ctx = glsl_context(RecordingGl::gl2());
    let before = ctx.generation();

    ctx.set_uniform_b(ShaderStage::Pixel, 3, &[0, 5, -1]);
    let mut bools = [7; 3];
    assert_eq!(ctx.uniform_b(ShaderStage::Pixel, 3, &mut bools), 3);
    assert_eq!(bools, [0, 1, 1]);

    ctx.set_uniform_i(ShaderStage::Vertex, 1, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let mut ints = [0; 4];
    assert_eq!(ctx.uniform_i(ShaderStage::Vertex, 2, &mut ints), 1);
    assert_eq!(ints, [5, 6, 7, 8]);

    let last = d3dfx_gl::registers::MAX_REG_FILE_F - 1;
    ctx.set_uniform_f(ShaderStage::Vertex, last, &[1.0; 8]);
    let mut floats = [0.0; 8];
    assert_eq!(ctx.uniform_f(ShaderStage::Vertex, last, &mut floats), 1);
    assert_eq!(floats[..4], [1.0; 4]);
    assert_eq!(ctx.generation(), before + 3);
}

#[test]
fn vertex_arrays_toggle_only_on_change() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());
    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();
    assert_eq!(ctx.vertex_attrib_location(Usage::Position, 0), Some(3));
    assert_eq!(ctx.vertex_attrib_location(Usage::Normal, 0), None);
    ctx.program_ready();
    ctx.api_mut().take_calls();

    let pointer = Call::VertexAttribPointer {
        index: 3,
        size: 3,
        ty: gl::FLOAT,
        normalized: false,
        stride: 12,
        offset: 0,
    };
    ctx.set_vertex_attribute(Usage::Position, 0, 3, VertexAttributeType::Float, false, 12, 0);
    ctx.set_vertex_attribute(Usage::Normal, 0, 3, VertexAttributeType::Float, false, 12, 12);
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![pointer.clone(), Call::EnableVertexAttribArray(3)]
    );

    ctx.set_vertex_attribute(Usage::Position, 0, 3, VertexAttributeType::Float, false, 12, 0);
    ctx.program_ready();
    assert_eq!(ctx.api_mut().take_calls(), vec![pointer]);

    ctx.bind_program(None);
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![Call::DisableVertexAttribArray(3), Call::UseProgram(0)]
    );
}

#[test]
fn half_float_attributes_use_the_available_enum() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &offset_vs());
    ctx.bind_shaders(Some(&vs), None).unwrap();
    ctx.api_mut().take_calls();
    ctx.set_vertex_attribute(Usage::Position, 0, 4, VertexAttributeType::HalfFloat, false, 8, 4);
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![Call::VertexAttribPointer {
            index: 3,
            size: 4,
            ty: gl::HALF_FLOAT_ARB,
            normalized: false,
            stride: 8,
            offset: 4,
        }]
    );
}

#[test]
fn divisors_need_instanced_arrays() {
    let mut ctx = glsl_context(glsl_driver());
    assert_eq!(
        ctx.set_vertex_attrib_divisor(Usage::Position, 0, 1),
        Err(GlError::MissingExtension("GL_ARB_instanced_arrays"))
    );
    assert_eq!(ctx.last_error(), "GL_ARB_instanced_arrays is not available");

    let mut ctx = glsl_context(RecordingGl::modern().with_attrib("vs_v0", 0));
    let vs = compile(&mut ctx, &offset_vs());
    ctx.bind_shaders(Some(&vs), None).unwrap();
    ctx.api_mut().take_calls();
    ctx.set_vertex_attrib_divisor(Usage::Position, 0, 1).unwrap();
    ctx.set_vertex_attrib_divisor(Usage::Position, 0, 1).unwrap();
    ctx.set_vertex_attrib_divisor(Usage::Color, 0, 2).unwrap();
    assert_eq!(ctx.api_mut().take_calls(), vec![Call::VertexAttribDivisor(0, 1)]);
}

#[test]
fn link_pushes_samplers_and_restores_the_bound_program() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &transform_vs("WorldViewProj"));
    let ps = compile(&mut ctx, &textured_ps());
    ctx.api_mut().take_calls();

    let program = ctx.link_program(Some(&vs), Some(&ps)).unwrap();
    let handle = program.handle();
    let calls = ctx.api_mut().take_calls();
    let tail = &calls[calls.len() - 3..];
    assert_eq!(
        tail,
        [Call::UseProgram(handle), Call::Uniform1i(2, 0), Call::UseProgram(0)]
    );
    assert_eq!(program.array_locations(ShaderStage::Pixel).float4, 1);
    assert_eq!(program.array_locations(ShaderStage::Pixel).int4, -1);
    assert!(ctx.bound_program().is_none());

    ctx.delete_program(program);
    assert_eq!(ctx.api_mut().take_calls(), vec![Call::DeleteProgram(handle)]);
}

#[test]
fn constant_arrays_are_uploaded_at_link() {
    let mut ctx = glsl_context(RecordingGl::gl2().with_uniform("vs_const_array_0_2", 7));
    let vs = compile(&mut ctx, &table_vs());
    let constant = vs
        .parse_data()
        .uniforms
        .iter()
        .find(|u| u.constant)
        .unwrap()
        .clone();
    assert_eq!(constant.name, "vs_const_array_0_2");

    ctx.api_mut().take_calls();
    ctx.link_program(Some(&vs), None).unwrap();
    let calls = ctx.api_mut().take_calls();
    assert!(
        calls.contains(&Call::Uniform4fv(
            7,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        )),
        "{calls:?}"
    );
}

#[test]
fn xna4_vertex_samplers_follow_the_pixel_units() {
    let mut api = RecordingGl::gl2().with_uniform("vs_s0", 4);
    api.integers.insert(gl::MAX_TEXTURE_IMAGE_UNITS, 20);
    let config = GlContextConfig {
        xna4_vertex_textures: true,
        ..GlContextConfig::new(Profile::Glsl)
    };
    let mut ctx = GlContext::new(api, config).unwrap();
    let vs = compile(&mut ctx, &fetch_vs());
    ctx.api_mut().take_calls();
    ctx.link_program(Some(&vs), None).unwrap();
    let calls = ctx.api_mut().take_calls();
    assert!(calls.contains(&Call::Uniform1i(4, 16)), "{calls:?}");
}

#[test]
fn bump_environment_feeds_texbem_slots() {
    let mut ctx = glsl_context(RecordingGl::gl2().with_uniform("ps_uniforms_vec4", 4));
    let ps = compile(&mut ctx, &bump_ps());
    assert_eq!(ps.parse_data().texbem_count(), 1);
    ctx.bind_shaders(None, Some(&ps)).unwrap();
    assert_eq!(ctx.bound_program().unwrap().texbem_count(), 1);
    ctx.api_mut().take_calls();

    ctx.set_legacy_bump_map_env(1, [0.5, 0.0, 0.0, 0.5], 2.0, 0.25);
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![Call::Uniform4fv(
            4,
            vec![0.5, 0.0, 0.0, 0.5, 2.0, 0.25, 0.0, 0.0]
        )]
    );

    // Stage 0 and stages past the last texbem stage have no environment.
    let generation = ctx.generation();
    ctx.set_legacy_bump_map_env(0, [1.0; 4], 1.0, 1.0);
    ctx.set_legacy_bump_map_env(4, [1.0; 4], 1.0, 1.0);
    assert_eq!(ctx.generation(), generation);
}

#[test]
fn point_size_is_enabled_with_the_program_writing_it() {
    let mut ctx = glsl_context(glsl_driver());
    let points = compile(&mut ctx, &point_vs());
    let plain = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());

    ctx.bind_shaders(Some(&points), Some(&ps)).unwrap();
    assert!(ctx.bound_program().unwrap().uses_pointsize());
    ctx.api_mut().take_calls();
    ctx.program_ready();
    ctx.program_ready();
    let calls = ctx.api_mut().take_calls();
    assert_eq!(count(&calls, |c| *c == Call::Enable(gl::PROGRAM_POINT_SIZE)), 1);

    ctx.bind_shaders(Some(&plain), Some(&ps)).unwrap();
    ctx.program_ready();
    let calls = ctx.api_mut().take_calls();
    assert!(calls.contains(&Call::Disable(gl::PROGRAM_POINT_SIZE)));
}

#[test]
fn deleting_a_shader_evicts_programs_using_it() {
    let mut ctx = glsl_context(glsl_driver());
    let vs = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());
    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();
    let program = ctx.bound_program().unwrap().handle();
    let vs_handle = vs.handle();
    ctx.api_mut().take_calls();

    ctx.delete_shader(vs);
    // Still bound, so nothing is deleted yet.
    assert_eq!(ctx.api_mut().take_calls(), vec![]);

    ctx.bind_program(None);
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::UseProgram(0),
            Call::DeleteProgram(program),
            Call::DeleteShader(vs_handle),
        ]
    );
    assert!(ctx.cached_program(None, Some(&ps)).is_none());
}

#[test]
fn compile_and_link_failures_carry_the_driver_log() {
    let mut api = RecordingGl::gl2();
    api.fail_compile = Some("0:3: 'vs_r9' undeclared".to_owned());
    let mut ctx = glsl_context(api);
    let err = ctx
        .compile_shader(&offset_vs(), &TranslateOptions::default())
        .unwrap_err();
    assert_eq!(err, GlError::Compile("0:3: 'vs_r9' undeclared".to_owned()));
    assert_eq!(ctx.last_error(), "0:3: 'vs_r9' undeclared");
    let calls = ctx.api_mut().take_calls();
    assert!(matches!(calls.last(), Some(Call::DeleteShader(_))), "{calls:?}");

    ctx.api_mut().fail_compile = None;
    ctx.api_mut().fail_link = Some("varying mismatch".to_owned());
    let vs = compile(&mut ctx, &offset_vs());
    let err = ctx.bind_shaders(Some(&vs), None).unwrap_err();
    assert_eq!(err, GlError::Link("varying mismatch".to_owned()));
    assert!(ctx.cached_program(Some(&vs), None).is_none());

    assert_eq!(ctx.link_program(None, None).unwrap_err(), GlError::NothingToLink);
}

#[test]
fn shaders_must_translate_for_the_context_profile() {
    let mut ctx = glsl_context(RecordingGl::gl2());
    let err = ctx
        .compile_shader(&[1, 2, 3, 4], &TranslateOptions::default())
        .unwrap_err();
    assert!(matches!(err, GlError::Translate(_)), "{err:?}");

    let arb = parse(Profile::Arb1, &tint_ps(), &TranslateOptions::default());
    let err = ctx.compile_parsed(Rc::new(arb)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "shader was translated for arb1, context uses glsl"
    );
}

#[test]
fn attribute_locations_past_the_tracked_range_fail_the_link() {
    let mut ctx = glsl_context(RecordingGl::gl2().with_attrib("vs_v0", 40));
    let vs = compile(&mut ctx, &offset_vs());
    assert_eq!(
        ctx.link_program(Some(&vs), None).unwrap_err(),
        GlError::AttributeLocation(40)
    );
}

#[test]
fn arb_compile_errors_report_position_and_message() {
    let mut api = RecordingGl::arb();
    api.arb_error = Some((12, "unexpected token".to_owned()));
    let mut ctx = GlContext::new(api, GlContextConfig::new(Profile::Arb1)).unwrap();
    ctx.api_mut().take_calls();

    let err = ctx
        .compile_shader(&tint_ps(), &TranslateOptions::default())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "ARB1 compile error at position 12: unexpected token"
    );
    let calls = ctx.api_mut().take_calls();
    let Some(Call::GenProgramArb(program)) = calls.first().cloned() else {
        panic!("{calls:?}");
    };
    assert!(calls.ends_with(&[
        Call::BindProgramArb(gl::FRAGMENT_PROGRAM_ARB, 0),
        Call::DeleteProgramArb(program),
    ]));
}

#[test]
fn arb_programs_bind_both_targets_and_push_locals() {
    let mut ctx = GlContext::new(RecordingGl::arb(), GlContextConfig::new(Profile::Arb1)).unwrap();
    let vs = compile(&mut ctx, &offset_vs());
    let ps = compile(&mut ctx, &tint_ps());
    ctx.api_mut().take_calls();

    ctx.bind_shaders(Some(&vs), Some(&ps)).unwrap();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::Enable(gl::VERTEX_PROGRAM_ARB),
            Call::BindProgramArb(gl::VERTEX_PROGRAM_ARB, vs.handle()),
            Call::Enable(gl::FRAGMENT_PROGRAM_ARB),
            Call::BindProgramArb(gl::FRAGMENT_PROGRAM_ARB, ps.handle()),
        ]
    );
    assert_eq!(ctx.vertex_attrib_location(Usage::Position, 0), Some(0));

    ctx.set_uniform_f(ShaderStage::Vertex, 2, &[1.0, 2.0, 3.0, 4.0]);
    ctx.set_uniform_f(ShaderStage::Pixel, 1, &[5.0, 6.0, 7.0, 8.0]);
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::LocalParameter4fv(gl::VERTEX_PROGRAM_ARB, 0, [1.0, 2.0, 3.0, 4.0]),
            Call::LocalParameter4fv(gl::FRAGMENT_PROGRAM_ARB, 0, [5.0, 6.0, 7.0, 8.0]),
        ]
    );
}

/// objects: 0 annotation-free texture, 1 sampler texture, 2 vertex shader, 3 pixel shader
fn textured_effect() -> Vec<u8> {
    let mut b = EffectBuilder::new();
    b.objects(4);

    let wvp = b.float_value("WorldViewProj", 4, 4, &IDENTITY);
    b.param(wvp);
    let tint = b.float_value("Tint", 1, 4, &[1.0, 0.5, 0.25, 1.0]);
    b.param(tint);
    let texture = b.object_value(SymbolType::Texture2D, "DiffuseTexture", &[0]);
    b.param(texture);
    let texture_ref = b.object_value(SymbolType::Texture, "", &[1]);
    let sampler = b.sampler_value(
        SymbolType::Sampler2D,
        "Diffuse",
        &[(SamplerStateType::Texture.raw(), texture_ref)],
    );
    b.param(sampler);

    let vs = b.object_value(SymbolType::VertexShader, "", &[2]);
    let ps = b.object_value(SymbolType::PixelShader, "", &[3]);
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
    b.small_object(1, b"DiffuseTexture\0".to_vec())
        .small_object(2, transform_vs("WorldViewProj"))
        .small_object(3, textured_ps());
    b.build()
}

#[test]
fn effect_passes_bind_shaders_and_feed_parameters() {
    let mut ctx = glsl_context(glsl_driver());
    let effect = parse_effect(&textured_effect(), &EffectOptions::default()).unwrap();
    let mut fx = GlEffect::compile(&mut ctx, effect).unwrap();
    let vs = fx.shader(2).unwrap().clone();
    let ps = fx.shader(3).unwrap().clone();
    assert!(fx.state_changes().is_none());

    assert_eq!(fx.begin(&ctx, true), 1);
    fx.begin_pass(&mut ctx, 0).unwrap();
    let program = ctx.bound_program().unwrap().clone();
    assert_eq!(program.handles().vertex, vs.handle());
    assert_eq!(program.handles().pixel, ps.handle());
    assert_eq!(ctx.registers().vertex.f[..16], IDENTITY);
    assert_eq!(ctx.registers().pixel.f[..4], [1.0, 0.5, 0.25, 1.0]);

    let changes = fx.state_changes().unwrap();
    assert_eq!(changes.render_states.len(), 3);
    assert!(changes.vertex_samplers.is_empty());
    assert_eq!(changes.pixel_samplers.len(), 1);
    assert_eq!(changes.pixel_samplers[0].name, "Diffuse");

    ctx.api_mut().take_calls();
    ctx.program_ready();
    assert_eq!(
        ctx.api_mut().take_calls(),
        vec![
            Call::Uniform4fv(0, IDENTITY.to_vec()),
            Call::Uniform4fv(1, vec![1.0, 0.5, 0.25, 1.0]),
        ]
    );

    // Committing unchanged parameters uploads nothing.
    fx.commit_changes(&mut ctx).unwrap();
    ctx.program_ready();
    assert_eq!(ctx.api_mut().take_calls(), vec![]);

    fx.effect_mut()
        .set_raw_value_name("Tint", &float_bytes(&[0.0, 1.0, 0.0, 1.0]), 0)
        .unwrap();
    fx.commit_changes(&mut ctx).unwrap();
    ctx.program_ready();
    let calls = ctx.api_mut().take_calls();
    assert!(calls.contains(&Call::Uniform4fv(1, vec![0.0, 1.0, 0.0, 1.0])), "{calls:?}");

    fx.end_pass().unwrap();
    assert_eq!(fx.end_pass(), Err(GlError::Effect(d3dfx_effect::EffectApiError::NoActivePass)));
    fx.end(&mut ctx);
    assert!(ctx.bound_program().is_none());
    assert!(fx.state_changes().is_none());

    fx.delete(&mut ctx);
}

fn selector_effect() -> Vec<u8> {
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
    b.small_object(0, flat_ps()).small_object(1, tint_ps());

    let ctab = build_ctab(&[float4_constant("Index", 0, 1)]);
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
    b.build()
}

#[test]
fn standalone_preshaders_pick_the_pass_shader_at_commit() {
    let mut ctx = glsl_context(glsl_driver());
    let effect = parse_effect(&selector_effect(), &EffectOptions::default()).unwrap();
    let mut fx = GlEffect::compile(&mut ctx, effect).unwrap();
    assert!(fx.shader(2).is_none());
    let first = fx.shader(0).unwrap().handle();
    let second = fx.shader(1).unwrap().handle();

    fx.begin(&ctx, false);
    fx.begin_pass(&mut ctx, 0).unwrap();
    assert_eq!(ctx.bound_program().unwrap().handles().pixel, second);

    fx.effect_mut()
        .set_raw_value_name("Index", &float_bytes(&[0.0]), 0)
        .unwrap();
    fx.commit_changes(&mut ctx).unwrap();
    assert_eq!(ctx.bound_program().unwrap().handles().pixel, first);

    fx.effect_mut()
        .set_raw_value_name("Index", &float_bytes(&[5.0]), 0)
        .unwrap();
    assert_eq!(
        fx.commit_changes(&mut ctx).unwrap_err(),
        GlError::SelectorOutOfRange {
            selector: 5.0,
            count: 2,
        }
    );
}
