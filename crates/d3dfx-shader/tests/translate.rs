use d3dfx_shader::ctab::builder::{build as build_ctab, CtabConstant};
use d3dfx_shader::preshader::builder::{build as build_preshader, Inst, Op};
use d3dfx_shader::preshader::PreshaderOpcode;
use d3dfx_shader::{
    parse, AttributeSwizzle, Profile, ShaderCache, ShaderCacheLookupSource, ShaderStage,
    SymbolClass, SymbolRegisterSet, SymbolType, SymbolTypeInfo, TranslateOptions, UniformType,
    Usage,
};
use pretty_assertions::assert_eq;

fn version_token(stage: ShaderStage, major: u8, minor: u8) -> u32 {
    let prefix = match stage {
        ShaderStage::Vertex => 0xFFFE_0000,
        ShaderStage::Pixel => 0xFFFF_0000,
    };
    prefix | ((major as u32) << 8) | (minor as u32)
}

fn opcode_token(op: u16, operand_tokens: u8) -> u32 {
    // SM2+ stores the operand token count (opcode token excluded) in bits 24..27.
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

fn src_token(regtype: u8, index: u32, swizzle: u8, srcmod: u8) -> u32 {
    reg_token(regtype, index) | ((swizzle as u32) << 16) | ((srcmod as u32) << 24)
}

fn dcl_usage(usage: u32, index: u32) -> u32 {
    0x8000_0000 | usage | (index << 16)
}

fn comment(payload: &[u32]) -> Vec<u32> {
    let mut out = vec![0xFFFE | ((payload.len() as u32) << 16)];
    out.extend_from_slice(payload);
    out
}

fn to_bytes(tokens: &[u32]) -> Vec<u8> {
    tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
}

const END: u32 = 0x0000_FFFF;

/// vs_2_0: dcl_position v0 ; dcl_texcoord0 v1 ; m4x4 oPos, v0, c0 ; mov oT0, v1
fn transform_vs() -> Vec<u8> {
    to_bytes(&[
        version_token(ShaderStage::Vertex, 2, 0),
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(31, 2),
        dcl_usage(5, 0),
        dst_token(1, 1, 0xF),
        opcode_token(20, 3),
        dst_token(4, 0, 0xF),
        src_token(1, 0, 0xE4, 0),
        src_token(2, 0, 0xE4, 0),
        opcode_token(1, 2),
        dst_token(6, 0, 0xF),
        src_token(1, 1, 0xE4, 0),
        END,
    ])
}

/// ps_2_0: dcl t0.xy ; dcl_2d s0 ; texld r0, t0, s0 ; mul r0, r0, c0 ; mov oC0, r0
fn textured_ps() -> Vec<u8> {
    to_bytes(&[
        version_token(ShaderStage::Pixel, 2, 0),
        opcode_token(31, 2),
        0x8000_0000,
        dst_token(3, 0, 0x3),
        opcode_token(31, 2),
        0x8000_0000 | (2 << 27),
        dst_token(10, 0, 0xF),
        opcode_token(66, 3),
        dst_token(0, 0, 0xF),
        src_token(3, 0, 0xE4, 0),
        src_token(10, 0, 0xE4, 0),
        opcode_token(5, 3),
        dst_token(0, 0, 0xF),
        src_token(0, 0, 0xE4, 0),
        src_token(2, 0, 0xE4, 0),
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(0, 0, 0xE4, 0),
        END,
    ])
}

#[test]
fn glsl_vertex_shader_packs_matrix_rows_into_uniform_array() {
    let data = parse(Profile::Glsl, &transform_vs(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let glsl = &data.output;
    assert!(glsl.starts_with("#version 110\n"), "{glsl}");
    assert!(glsl.contains("uniform vec4 vs_uniforms_vec4[4];"), "{glsl}");
    assert!(glsl.contains("#define vs_c3 vs_uniforms_vec4[3]"), "{glsl}");
    assert!(glsl.contains("attribute vec4 vs_v0;"), "{glsl}");
    assert!(glsl.contains("varying vec4 v_texcoord0;"), "{glsl}");
    assert!(
        glsl.contains(
            "vs_oPos = vec4(dot(vs_v0, vs_c0), dot(vs_v0, vs_c1), dot(vs_v0, vs_c2), dot(vs_v0, vs_c3));"
        ),
        "{glsl}"
    );
    assert!(glsl.contains("gl_Position = vs_oPos;"), "{glsl}");
    assert!(glsl.contains("v_texcoord0 = vs_oT0;"), "{glsl}");

    assert_eq!(data.float4_count(), 4);
    assert!(data.uniforms.iter().all(|u| u.ty == UniformType::Float));
    let attrs: Vec<(Usage, u32, u32)> = data
        .attributes
        .iter()
        .map(|a| (a.usage, a.index, a.register))
        .collect();
    assert_eq!(attrs, vec![(Usage::Position, 0, 0), (Usage::TexCoord, 0, 1)]);
    let outputs: Vec<&str> = data.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(outputs, vec!["gl_Position", "v_texcoord0"]);
    assert_eq!(data.instruction_count, 2);
}

#[test]
fn glsles_adds_precision_and_custom_entry_point() {
    let options = TranslateOptions {
        mainfn: "ps_main".to_owned(),
        ..TranslateOptions::default()
    };
    let data = parse(Profile::GlslEs, &textured_ps(), &options);
    assert!(data.is_ok(), "{:?}", data.errors);
    assert!(data.output.starts_with("#version 100\n"));
    assert!(data.output.contains("precision mediump float;"));
    assert!(data.output.contains("void ps_main()"));
    assert!(data.output.ends_with("void main()\n{\n    ps_main();\n}\n"));
    assert_eq!(data.mainfn, "ps_main");
}

#[test]
fn glsl_pixel_shader_samples_declared_sampler() {
    let data = parse(Profile::Glsl120, &textured_ps(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let glsl = &data.output;
    assert!(glsl.starts_with("#version 120\n"));
    assert!(glsl.contains("uniform sampler2D ps_s0;"), "{glsl}");
    assert!(glsl.contains("ps_r0 = texture2D(ps_s0, (v_texcoord0).xy);"), "{glsl}");
    assert!(glsl.contains("ps_r0 = (ps_r0 * ps_c0);"), "{glsl}");
    assert!(glsl.contains("gl_FragColor = ps_oC0;"), "{glsl}");

    assert_eq!(data.samplers.len(), 1);
    assert_eq!(data.samplers[0].name, "ps_s0");
    assert!(!data.samplers[0].texbem);
}

#[test]
fn arb_fragment_program_reads_program_locals() {
    let data = parse(Profile::Arb1, &textured_ps(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let arb = &data.output;
    assert!(arb.starts_with("!!ARBfp1.0\n"), "{arb}");
    assert!(arb.contains("PARAM ps_uniforms[1] = { program.local[0..0] };"), "{arb}");
    assert!(arb.contains("OUTPUT ps_oC0 = result.color;"), "{arb}");
    assert!(arb.contains("TEX ps_r0, fragment.texcoord[0], texture[0], 2D;"), "{arb}");
    assert!(arb.contains("MUL ps_r0, ps_r0, ps_uniforms[0];"), "{arb}");
    assert!(arb.ends_with("END\n"), "{arb}");
}

/// ps_2_x: dcl t0.xy ; dcl t1 ; dcl_2d s0 ; texldd r0, t0, s0, t1, t1 ; mov oC0, r0
fn gradient_ps() -> Vec<u8> {
    to_bytes(&[
        version_token(ShaderStage::Pixel, 2, 1),
        opcode_token(31, 2),
        0x8000_0000,
        dst_token(3, 0, 0x3),
        opcode_token(31, 2),
        0x8000_0000,
        dst_token(3, 1, 0xF),
        opcode_token(31, 2),
        0x8000_0000 | (2 << 27),
        dst_token(10, 0, 0xF),
        opcode_token(93, 5),
        dst_token(0, 0, 0xF),
        src_token(3, 0, 0xE4, 0),
        src_token(10, 0, 0xE4, 0),
        src_token(3, 1, 0xE4, 0),
        src_token(3, 1, 0xE4, 0),
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(0, 0, 0xE4, 0),
        END,
    ])
}

#[test]
fn nv_fragment_program_samples_with_gradients() {
    let data = parse(Profile::Nv2, &gradient_ps(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);
    let arb = &data.output;
    assert!(
        arb.contains(
            "TXD ps_r0, fragment.texcoord[0], fragment.texcoord[1], fragment.texcoord[1], texture[0], 2D;"
        ),
        "{arb}"
    );
    assert!(!arb.contains("ps_s0"), "{arb}");

    let data = parse(Profile::Arb1, &gradient_ps(), &TranslateOptions::default());
    assert!(!data.is_ok());
    assert!(
        data.errors.iter().any(|e| e.message.contains("texldd")),
        "{:?}",
        data.errors
    );
}

#[test]
fn arb_vertex_program_aliases_outputs() {
    let data = parse(Profile::Nv2, &transform_vs(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let arb = &data.output;
    assert!(arb.starts_with("!!ARBvp1.0\nOPTION NV_vertex_program2;\n"), "{arb}");
    assert!(arb.contains("ATTRIB vs_v0 = vertex.attrib[0];"), "{arb}");
    assert!(arb.contains("OUTPUT vs_oPos = result.position;"), "{arb}");
    assert!(arb.contains("DP4 vs_scratch5.w, vs_v0, vs_uniforms[3];"), "{arb}");
    assert!(arb.contains("MOV vs_oT0, vs_v1;"), "{arb}");
}

/// vs_3_0 with `loop aL, i0` indexing `c0[aL]`.
fn loop_vs() -> Vec<u8> {
    to_bytes(&[
        version_token(ShaderStage::Vertex, 3, 0),
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(1, 0, 0xF),
        opcode_token(31, 2),
        dcl_usage(0, 0),
        dst_token(6, 0, 0xF),
        // defi i0, 3, 0, 1, 0
        opcode_token(48, 5),
        dst_token(7, 0, 0xF),
        3,
        0,
        1,
        0,
        opcode_token(1, 2),
        dst_token(0, 0, 0xF),
        src_token(1, 0, 0xE4, 0),
        // loop aL, i0
        opcode_token(27, 2),
        src_token(15, 0, 0xE4, 0),
        src_token(7, 0, 0xE4, 0),
        // add r0, r0, c0[aL]
        opcode_token(2, 4),
        dst_token(0, 0, 0xF),
        src_token(0, 0, 0xE4, 0),
        src_token(2, 0, 0xE4, 0) | 0x2000,
        src_token(15, 0, 0x00, 0),
        opcode_token(29, 0),
        opcode_token(1, 2),
        dst_token(6, 0, 0xF),
        src_token(0, 0, 0xE4, 0),
        END,
    ])
}

#[test]
fn glsl_loop_walks_relative_constant_range() {
    let data = parse(Profile::Glsl, &loop_vs(), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let glsl = &data.output;
    assert!(glsl.contains("const ivec4 vs_i0 = ivec4(3, 0, 1, 0);"), "{glsl}");
    assert!(glsl.contains("int vs_aL0 = (vs_i0).y;"), "{glsl}");
    assert!(
        glsl.contains("for (int vs_lc0 = 0; vs_lc0 < (vs_i0).x; vs_lc0++) {"),
        "{glsl}"
    );
    assert!(
        glsl.contains("vs_r0 = (vs_r0 + vs_uniforms_vec4[0 + vs_aL0]);"),
        "{glsl}"
    );
    assert!(glsl.contains("vs_aL0 += (vs_i0).z;"), "{glsl}");
    assert!(glsl.contains("gl_Position = vs_o0;"), "{glsl}");

    // With no constant table the whole vs_3_0 register file becomes one array.
    assert_eq!(data.uniforms.len(), 1);
    assert_eq!(data.uniforms[0].array_count, 256);
    assert_eq!(data.float4_count(), 256);
}

#[test]
fn arb_rejects_flow_control() {
    let data = parse(Profile::Arb1, &loop_vs(), &TranslateOptions::default());
    assert!(!data.is_ok());
    assert!(data.output.is_empty());
    assert!(
        data.errors
            .iter()
            .any(|e| e.message.contains("not supported by the arb1 profile")),
        "{:?}",
        data.errors
    );
}

#[test]
fn ps_1_1_texture_stages_and_r0_output() {
    let bytes = to_bytes(&[
        version_token(ShaderStage::Pixel, 1, 1),
        // tex t0
        66,
        dst_token(3, 0, 0xF),
        // mov r0, t0
        1,
        dst_token(0, 0, 0xF),
        src_token(3, 0, 0xE4, 0),
        END,
    ]);
    let data = parse(Profile::Glsl, &bytes, &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    let glsl = &data.output;
    assert!(glsl.contains("vec4 ps_t0;"), "{glsl}");
    assert!(glsl.contains("varying vec4 v_texcoord0;"), "{glsl}");
    assert!(glsl.contains("ps_t0 = texture2D(ps_s0, (v_texcoord0).xy);"), "{glsl}");
    assert!(glsl.contains("ps_r0 = ps_t0;"), "{glsl}");
    assert!(glsl.contains("gl_FragColor = ps_r0;"), "{glsl}");
}

#[test]
fn attribute_swizzle_reorders_vertex_input() {
    // vs_2_0: dcl_color v0 ; mov oD0, v0
    let bytes = to_bytes(&[
        version_token(ShaderStage::Vertex, 2, 0),
        opcode_token(31, 2),
        dcl_usage(10, 0),
        dst_token(1, 0, 0xF),
        opcode_token(1, 2),
        dst_token(5, 0, 0xF),
        src_token(1, 0, 0xE4, 0),
        END,
    ]);
    let options = TranslateOptions {
        swizzles: vec![AttributeSwizzle {
            usage: Usage::Color,
            index: 0,
            swizzles: [2, 1, 0, 3],
        }],
        ..TranslateOptions::default()
    };
    let data = parse(Profile::Glsl, &bytes, &options);
    assert!(data.is_ok(), "{:?}", data.errors);
    assert!(data.output.contains("vs_oD0 = vs_v0.zyxw;"), "{}", data.output);
    assert!(data.output.contains("v_color0 = vs_oD0;"), "{}", data.output);
    assert_eq!(data.swizzles, options.swizzles);
}

#[test]
fn undecodable_bytecode_reports_errors_without_output() {
    let data = parse(Profile::Glsl, &[1, 2, 3, 4], &TranslateOptions::default());
    assert!(!data.is_ok());
    assert!(data.output.is_empty());
    assert_eq!(data.version, None);
}

#[test]
fn constant_table_and_embedded_preshader_are_extracted() {
    let float4 = |name, register_index, register_count| CtabConstant {
        name,
        register_set: SymbolRegisterSet::Float4,
        register_index,
        register_count,
        info: SymbolTypeInfo {
            class: SymbolClass::Vector,
            ty: SymbolType::Float,
            rows: 1,
            columns: 4,
            elements: 1,
            members: Vec::new(),
        },
    };
    let ctab = build_ctab(&[float4("Tint", 0, 1)]);
    let pre_ctab = build_ctab(&[float4("Scale", 0, 1)]);
    let mut pres = vec![u32::from_le_bytes(*b"PRES")];
    pres.extend(build_preshader(
        &pre_ctab,
        &[2.0, 2.0, 2.0, 2.0],
        &[Inst {
            opcode: PreshaderOpcode::Mul,
            elements: 4,
            operands: vec![Op::input(0), Op::literal(0), Op::output(0)],
        }],
        &[],
    ));

    let mut tokens = vec![version_token(ShaderStage::Pixel, 2, 0)];
    tokens.extend(comment(&ctab));
    tokens.extend(comment(&pres));
    tokens.extend([
        opcode_token(1, 2),
        dst_token(8, 0, 0xF),
        src_token(2, 0, 0xE4, 0),
        END,
    ]);
    let data = parse(Profile::Glsl, &to_bytes(&tokens), &TranslateOptions::default());
    assert!(data.is_ok(), "{:?}", data.errors);

    assert_eq!(data.symbols.len(), 1);
    assert_eq!(data.symbols[0].name, "Tint");
    let mut preshader = data.preshader.clone().unwrap();
    assert_eq!(preshader.symbols[0].name, "Scale");
    preshader.registers.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
    let mut out = [0.0f32; 4];
    preshader.run(&mut out).unwrap();
    assert_eq!(out, [2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn shader_cache_translates_once_per_key() {
    let mut cache = ShaderCache::default();
    let options = TranslateOptions::default();
    let bytes = transform_vs();

    let first = cache.get_or_translate(Profile::Glsl, &bytes, &options);
    assert_eq!(first.source, ShaderCacheLookupSource::Translated);
    let output = first.output.clone();

    let second = cache.get_or_translate(Profile::Glsl, &bytes, &options);
    assert_eq!(second.source, ShaderCacheLookupSource::Memory);
    assert_eq!(second.output, output);

    // A different profile is a different translation.
    let arb = cache.get_or_translate(Profile::Arb1, &bytes, &options);
    assert_eq!(arb.source, ShaderCacheLookupSource::Translated);
    assert_eq!(cache.len(), 2);
}
