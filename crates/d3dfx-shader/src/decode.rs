use crate::shader_limits::{
    MAX_SAMPLER_REGISTER_INDEX, MAX_SHADER_BYTECODE_BYTES, MAX_SHADER_REGISTER_INDEX,
    MAX_SHADER_TOKEN_COUNT, MAX_TEMP_REGISTER_INDEX, MAX_TEXCOORD_REGISTER_INDEX,
};
use crate::types::{ShaderStage, ShaderVersion, Usage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub token_index: usize,
    pub message: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "D3D9 shader decode error at token {}: {}",
            self.token_index, self.message
        )
    }
}

impl std::error::Error for DecodeError {}

fn err(token_index: usize, message: impl Into<String>) -> DecodeError {
    DecodeError {
        token_index,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionLocation {
    pub instruction_index: usize,
    pub token_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedShader {
    pub version: ShaderVersion,
    pub instructions: Vec<DecodedInstruction>,
}

impl DecodedShader {
    /// Payloads of every comment block, in stream order.
    pub fn comments(&self) -> impl Iterator<Item = &[u32]> {
        self.instructions
            .iter()
            .filter_map(|inst| inst.comment_data.as_deref())
    }

    /// Number of real instructions (comments, declarations, `def*` and `end` excluded).
    pub fn instruction_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|inst| !inst.opcode.is_declaration())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub location: InstructionLocation,
    pub opcode: Opcode,
    /// Opcode-specific control bits (`opcode_token[16..24]`): the comparison for `ifc`/`breakc`/
    /// `setp`, the `texld` variant, the `sincos` form.
    pub specific: u8,
    /// Total length of the instruction in tokens, including the opcode token.
    pub length: usize,
    pub coissue: bool,
    pub result_modifier: ResultModifier,
    pub predicate: Option<SrcOperand>,
    pub operands: Vec<Operand>,
    pub dcl: Option<DclInfo>,
    pub comment_data: Option<Vec<u32>>,
}

impl DecodedInstruction {
    pub fn dst(&self) -> Option<&DstOperand> {
        self.operands.iter().find_map(|op| match op {
            Operand::Dst(dst) => Some(dst),
            _ => None,
        })
    }

    pub fn srcs(&self) -> impl Iterator<Item = &SrcOperand> {
        self.operands.iter().filter_map(|op| match op {
            Operand::Src(src) => Some(src),
            _ => None,
        })
    }

    pub fn src(&self, n: usize) -> Option<&SrcOperand> {
        self.srcs().nth(n)
    }

    pub fn immediates(&self) -> impl Iterator<Item = u32> + '_ {
        self.operands.iter().filter_map(|op| match op {
            Operand::Imm32(v) => Some(*v),
            _ => None,
        })
    }

    pub fn compare(&self) -> CompareOp {
        CompareOp::from_raw(self.specific & 0x7)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    Mov,
    Add,
    Sub,
    Mad,
    Mul,
    Rcp,
    Rsq,
    Dp3,
    Dp4,
    Min,
    Max,
    Slt,
    Sge,
    Exp,
    Log,
    Lit,
    Dst,
    Lrp,
    Frc,
    M4x4,
    M4x3,
    M3x4,
    M3x3,
    M3x2,
    Call,
    CallNz,
    Loop,
    Ret,
    EndLoop,
    Label,
    Dcl,
    Pow,
    Crs,
    Sgn,
    Abs,
    Nrm,
    SinCos,
    Rep,
    EndRep,
    If,
    Ifc,
    Else,
    EndIf,
    Break,
    Breakc,
    Mova,
    DefB,
    DefI,
    TexCoord,
    TexKill,
    Tex,
    TexBem,
    TexBemL,
    TexReg2Ar,
    TexReg2Gb,
    TexM3x2Pad,
    TexM3x2Tex,
    TexM3x3Pad,
    TexM3x3Tex,
    TexM3x3Spec,
    TexM3x3VSpec,
    ExpP,
    LogP,
    Cnd,
    Def,
    TexReg2Rgb,
    TexDp3Tex,
    TexM3x2Depth,
    TexDp3,
    TexM3x3,
    TexDepth,
    Cmp,
    Bem,
    Dp2Add,
    Dsx,
    Dsy,
    TexLdd,
    Setp,
    TexLdl,
    BreakP,
    Phase,
    Comment,
    End,
    Unknown(u16),
}

impl Opcode {
    pub fn from_raw(op: u16) -> Self {
        match op {
            0 => Self::Nop,
            1 => Self::Mov,
            2 => Self::Add,
            3 => Self::Sub,
            4 => Self::Mad,
            5 => Self::Mul,
            6 => Self::Rcp,
            7 => Self::Rsq,
            8 => Self::Dp3,
            9 => Self::Dp4,
            10 => Self::Min,
            11 => Self::Max,
            12 => Self::Slt,
            13 => Self::Sge,
            14 => Self::Exp,
            15 => Self::Log,
            16 => Self::Lit,
            17 => Self::Dst,
            18 => Self::Lrp,
            19 => Self::Frc,
            20 => Self::M4x4,
            21 => Self::M4x3,
            22 => Self::M3x4,
            23 => Self::M3x3,
            24 => Self::M3x2,
            25 => Self::Call,
            26 => Self::CallNz,
            27 => Self::Loop,
            28 => Self::Ret,
            29 => Self::EndLoop,
            30 => Self::Label,
            31 => Self::Dcl,
            32 => Self::Pow,
            33 => Self::Crs,
            34 => Self::Sgn,
            35 => Self::Abs,
            36 => Self::Nrm,
            37 => Self::SinCos,
            38 => Self::Rep,
            39 => Self::EndRep,
            40 => Self::If,
            41 => Self::Ifc,
            42 => Self::Else,
            43 => Self::EndIf,
            44 => Self::Break,
            45 => Self::Breakc,
            46 => Self::Mova,
            47 => Self::DefB,
            48 => Self::DefI,
            64 => Self::TexCoord,
            65 => Self::TexKill,
            66 => Self::Tex,
            67 => Self::TexBem,
            68 => Self::TexBemL,
            69 => Self::TexReg2Ar,
            70 => Self::TexReg2Gb,
            71 => Self::TexM3x2Pad,
            72 => Self::TexM3x2Tex,
            73 => Self::TexM3x3Pad,
            74 => Self::TexM3x3Tex,
            76 => Self::TexM3x3Spec,
            77 => Self::TexM3x3VSpec,
            78 => Self::ExpP,
            79 => Self::LogP,
            80 => Self::Cnd,
            81 => Self::Def,
            82 => Self::TexReg2Rgb,
            83 => Self::TexDp3Tex,
            84 => Self::TexM3x2Depth,
            85 => Self::TexDp3,
            86 => Self::TexM3x3,
            87 => Self::TexDepth,
            88 => Self::Cmp,
            89 => Self::Bem,
            90 => Self::Dp2Add,
            91 => Self::Dsx,
            92 => Self::Dsy,
            93 => Self::TexLdd,
            94 => Self::Setp,
            95 => Self::TexLdl,
            96 => Self::BreakP,
            0xFFFD => Self::Phase,
            0xFFFE => Self::Comment,
            0xFFFF => Self::End,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw `D3DSHADER_INSTRUCTION_OPCODE_TYPE` value.
    #[deny(unreachable_patterns)]
    pub fn raw(&self) -> u16 {
        match self {
            Self::Nop => 0,
            Self::Mov => 1,
            Self::Add => 2,
            Self::Sub => 3,
            Self::Mad => 4,
            Self::Mul => 5,
            Self::Rcp => 6,
            Self::Rsq => 7,
            Self::Dp3 => 8,
            Self::Dp4 => 9,
            Self::Min => 10,
            Self::Max => 11,
            Self::Slt => 12,
            Self::Sge => 13,
            Self::Exp => 14,
            Self::Log => 15,
            Self::Lit => 16,
            Self::Dst => 17,
            Self::Lrp => 18,
            Self::Frc => 19,
            Self::M4x4 => 20,
            Self::M4x3 => 21,
            Self::M3x4 => 22,
            Self::M3x3 => 23,
            Self::M3x2 => 24,
            Self::Call => 25,
            Self::CallNz => 26,
            Self::Loop => 27,
            Self::Ret => 28,
            Self::EndLoop => 29,
            Self::Label => 30,
            Self::Dcl => 31,
            Self::Pow => 32,
            Self::Crs => 33,
            Self::Sgn => 34,
            Self::Abs => 35,
            Self::Nrm => 36,
            Self::SinCos => 37,
            Self::Rep => 38,
            Self::EndRep => 39,
            Self::If => 40,
            Self::Ifc => 41,
            Self::Else => 42,
            Self::EndIf => 43,
            Self::Break => 44,
            Self::Breakc => 45,
            Self::Mova => 46,
            Self::DefB => 47,
            Self::DefI => 48,
            Self::TexCoord => 64,
            Self::TexKill => 65,
            Self::Tex => 66,
            Self::TexBem => 67,
            Self::TexBemL => 68,
            Self::TexReg2Ar => 69,
            Self::TexReg2Gb => 70,
            Self::TexM3x2Pad => 71,
            Self::TexM3x2Tex => 72,
            Self::TexM3x3Pad => 73,
            Self::TexM3x3Tex => 74,
            Self::TexM3x3Spec => 76,
            Self::TexM3x3VSpec => 77,
            Self::ExpP => 78,
            Self::LogP => 79,
            Self::Cnd => 80,
            Self::Def => 81,
            Self::TexReg2Rgb => 82,
            Self::TexDp3Tex => 83,
            Self::TexM3x2Depth => 84,
            Self::TexDp3 => 85,
            Self::TexM3x3 => 86,
            Self::TexDepth => 87,
            Self::Cmp => 88,
            Self::Bem => 89,
            Self::Dp2Add => 90,
            Self::Dsx => 91,
            Self::Dsy => 92,
            Self::TexLdd => 93,
            Self::Setp => 94,
            Self::TexLdl => 95,
            Self::BreakP => 96,
            Self::Phase => 0xFFFD,
            Self::Comment => 0xFFFE,
            Self::End => 0xFFFF,
            Self::Unknown(raw) => *raw,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Mov => "mov",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mad => "mad",
            Self::Mul => "mul",
            Self::Rcp => "rcp",
            Self::Rsq => "rsq",
            Self::Dp3 => "dp3",
            Self::Dp4 => "dp4",
            Self::Min => "min",
            Self::Max => "max",
            Self::Slt => "slt",
            Self::Sge => "sge",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Lit => "lit",
            Self::Dst => "dst",
            Self::Lrp => "lrp",
            Self::Frc => "frc",
            Self::M4x4 => "m4x4",
            Self::M4x3 => "m4x3",
            Self::M3x4 => "m3x4",
            Self::M3x3 => "m3x3",
            Self::M3x2 => "m3x2",
            Self::Call => "call",
            Self::CallNz => "callnz",
            Self::Loop => "loop",
            Self::Ret => "ret",
            Self::EndLoop => "endloop",
            Self::Label => "label",
            Self::Dcl => "dcl",
            Self::Pow => "pow",
            Self::Crs => "crs",
            Self::Sgn => "sgn",
            Self::Abs => "abs",
            Self::Nrm => "nrm",
            Self::SinCos => "sincos",
            Self::Rep => "rep",
            Self::EndRep => "endrep",
            Self::If => "if",
            Self::Ifc => "ifc",
            Self::Else => "else",
            Self::EndIf => "endif",
            Self::Break => "break",
            Self::Breakc => "breakc",
            Self::Mova => "mova",
            Self::DefB => "defb",
            Self::DefI => "defi",
            Self::TexCoord => "texcoord",
            Self::TexKill => "texkill",
            Self::Tex => "texld",
            Self::TexBem => "texbem",
            Self::TexBemL => "texbeml",
            Self::TexReg2Ar => "texreg2ar",
            Self::TexReg2Gb => "texreg2gb",
            Self::TexM3x2Pad => "texm3x2pad",
            Self::TexM3x2Tex => "texm3x2tex",
            Self::TexM3x3Pad => "texm3x3pad",
            Self::TexM3x3Tex => "texm3x3tex",
            Self::TexM3x3Spec => "texm3x3spec",
            Self::TexM3x3VSpec => "texm3x3vspec",
            Self::ExpP => "expp",
            Self::LogP => "logp",
            Self::Cnd => "cnd",
            Self::Def => "def",
            Self::TexReg2Rgb => "texreg2rgb",
            Self::TexDp3Tex => "texdp3tex",
            Self::TexM3x2Depth => "texm3x2depth",
            Self::TexDp3 => "texdp3",
            Self::TexM3x3 => "texm3x3",
            Self::TexDepth => "texdepth",
            Self::Cmp => "cmp",
            Self::Bem => "bem",
            Self::Dp2Add => "dp2add",
            Self::Dsx => "dsx",
            Self::Dsy => "dsy",
            Self::TexLdd => "texldd",
            Self::Setp => "setp",
            Self::TexLdl => "texldl",
            Self::BreakP => "breakp",
            Self::Phase => "phase",
            Self::Comment => "comment",
            Self::End => "end",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Declarations and stream markers; these never count towards the instruction total.
    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            Self::Dcl
                | Self::Def
                | Self::DefI
                | Self::DefB
                | Self::Comment
                | Self::End
                | Self::Phase
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Eq,
    Ge,
    Lt,
    Ne,
    Le,
    Unknown(u8),
}

impl CompareOp {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Gt,
            2 => Self::Eq,
            3 => Self::Ge,
            4 => Self::Lt,
            5 => Self::Ne,
            6 => Self::Le,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultModifier {
    pub saturate: bool,
    pub partial_precision: bool,
    pub centroid: bool,
    pub shift: ResultShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultShift {
    #[default]
    None,
    Mul2,
    Mul4,
    Mul8,
    Div2,
    Div4,
    Div8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Dst,
    Src,
    Imm32,
    /// The usage token in front of a `dcl` destination.
    Decl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Dst(DstOperand),
    Src(SrcOperand),
    Imm32(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DstOperand {
    pub reg: RegisterRef,
    pub mask: WriteMask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcOperand {
    pub reg: RegisterRef,
    pub swizzle: Swizzle,
    pub modifier: SrcModifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRef {
    pub file: RegisterFile,
    pub index: u32,
    pub relative: Option<RelativeAddress>,
}

/// `a0.c` or `aL` used to index a constant or input register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeAddress {
    pub file: RegisterFile,
    pub index: u32,
    pub component: SwizzleComponent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterFile {
    Temp,
    Input,
    Const,
    Addr,
    Texture,
    RastOut,
    AttrOut,
    TexCoordOut,
    Output,
    ConstInt,
    ColorOut,
    DepthOut,
    Sampler,
    ConstBool,
    Loop,
    Label,
    Predicate,
    MiscType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegDecodeContext {
    Operand,
    Relative,
}

impl RegisterFile {
    fn from_raw(raw: u8, version: ShaderVersion, ctx: RegDecodeContext) -> Option<Self> {
        // `D3DSHADER_PARAM_REGISTER_TYPE`. Type 3 is `a#` in vertex shaders and `t#` in pixel
        // shaders, but always an address register when it names a relative index. Type 6 is
        // `oT#` before vs_3_0 and the generic `o#` file from vs_3_0 on.
        Some(match raw {
            0 => Self::Temp,
            1 => Self::Input,
            2 => Self::Const,
            3 => match (ctx, version.stage) {
                (RegDecodeContext::Relative, _) | (_, ShaderStage::Vertex) => Self::Addr,
                (_, ShaderStage::Pixel) => Self::Texture,
            },
            4 => Self::RastOut,
            5 => Self::AttrOut,
            6 if version.stage == ShaderStage::Vertex && version.major >= 3 => Self::Output,
            6 => Self::TexCoordOut,
            7 => Self::ConstInt,
            8 => Self::ColorOut,
            9 => Self::DepthOut,
            10 => Self::Sampler,
            14 => Self::ConstBool,
            15 => Self::Loop,
            17 => Self::MiscType,
            18 => Self::Label,
            19 => Self::Predicate,
            _ => return None,
        })
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Temp => "r",
            Self::Input => "v",
            Self::Const => "c",
            Self::Addr => "a",
            Self::Texture => "t",
            Self::RastOut => "oRast",
            Self::AttrOut => "oD",
            Self::TexCoordOut => "oT",
            Self::Output => "o",
            Self::ConstInt => "i",
            Self::ColorOut => "oC",
            Self::DepthOut => "oDepth",
            Self::Sampler => "s",
            Self::ConstBool => "b",
            Self::Loop => "aL",
            Self::Label => "l",
            Self::Predicate => "p",
            Self::MiscType => "misc",
        }
    }

    fn max_index(&self) -> u32 {
        match self {
            Self::Temp => MAX_TEMP_REGISTER_INDEX,
            Self::Texture | Self::TexCoordOut => MAX_TEXCOORD_REGISTER_INDEX,
            Self::Sampler => MAX_SAMPLER_REGISTER_INDEX,
            Self::Addr | Self::Loop | Self::Predicate | Self::DepthOut => 0,
            Self::RastOut | Self::AttrOut | Self::MiscType => 3,
            _ => MAX_SHADER_REGISTER_INDEX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteMask(pub u8);

impl WriteMask {
    pub fn all() -> Self {
        Self(0xF)
    }

    pub fn contains(&self, component: SwizzleComponent) -> bool {
        (self.0 & (1 << component.index())) != 0
    }

    pub fn is_all(&self) -> bool {
        self.0 == 0xF
    }

    pub fn components(&self) -> impl Iterator<Item = SwizzleComponent> + '_ {
        SwizzleComponent::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    pub fn count(&self) -> usize {
        (self.0 & 0xF).count_ones() as usize
    }

    /// `xyzw`-style suffix without the leading dot.
    pub fn suffix(&self) -> String {
        self.components().map(SwizzleComponent::letter).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Swizzle(pub [SwizzleComponent; 4]);

impl Swizzle {
    pub fn identity() -> Self {
        Self(SwizzleComponent::ALL)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn from_raw(raw: u8) -> Self {
        let mut comps = [SwizzleComponent::X; 4];
        for (i, comp) in comps.iter_mut().enumerate() {
            *comp = SwizzleComponent::from_index((raw >> (i * 2)) & 0x3);
        }
        Self(comps)
    }

    pub fn raw(&self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |acc, (i, c)| acc | (c.index() << (i * 2)))
    }

    /// Composes with an outer swizzle: `self.then(outer)` reads `outer` through `self`.
    pub fn then(&self, outer: Swizzle) -> Swizzle {
        Swizzle(outer.0.map(|c| self.0[c.index() as usize]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwizzleComponent {
    X,
    Y,
    Z,
    W,
}

impl SwizzleComponent {
    pub const ALL: [SwizzleComponent; 4] = [Self::X, Self::Y, Self::Z, Self::W];

    pub fn from_index(index: u8) -> Self {
        match index & 0x3 {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            _ => Self::W,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
            Self::W => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcModifier {
    None,
    Negate,
    Bias,
    BiasNegate,
    Sign,
    SignNegate,
    Comp,
    X2,
    X2Negate,
    Dz,
    Dw,
    Abs,
    AbsNegate,
    Not,
}

impl SrcModifier {
    fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Negate,
            2 => Self::Bias,
            3 => Self::BiasNegate,
            4 => Self::Sign,
            5 => Self::SignNegate,
            6 => Self::Comp,
            7 => Self::X2,
            8 => Self::X2Negate,
            9 => Self::Dz,
            10 => Self::Dw,
            11 => Self::Abs,
            12 => Self::AbsNegate,
            13 => Self::Not,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DclInfo {
    pub usage: DclUsage,
    pub usage_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DclUsage {
    Usage(Usage),
    TextureType(TextureType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    Texture2D,
    TextureCube,
    Texture3D,
}

pub fn decode_u8_le_bytes(bytes: &[u8]) -> Result<DecodedShader, DecodeError> {
    if bytes.len() > MAX_SHADER_BYTECODE_BYTES {
        return Err(err(
            0,
            format!(
                "bytecode length {} exceeds maximum {} bytes",
                bytes.len(),
                MAX_SHADER_BYTECODE_BYTES
            ),
        ));
    }
    if bytes.len() % 4 != 0 {
        return Err(err(
            0,
            format!("bytecode length {} is not a multiple of 4", bytes.len()),
        ));
    }
    let tokens: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    decode_u32_tokens(&tokens)
}

pub fn decode_version_token(token: u32) -> Option<ShaderVersion> {
    let stage = match token & 0xFFFF_0000 {
        0xFFFE_0000 => ShaderStage::Vertex,
        0xFFFF_0000 => ShaderStage::Pixel,
        _ => return None,
    };
    Some(ShaderVersion {
        stage,
        major: ((token >> 8) & 0xFF) as u8,
        minor: (token & 0xFF) as u8,
    })
}

pub fn decode_u32_tokens(tokens: &[u32]) -> Result<DecodedShader, DecodeError> {
    if tokens.len() > MAX_SHADER_TOKEN_COUNT {
        return Err(err(
            0,
            format!(
                "token count {} exceeds maximum {}",
                tokens.len(),
                MAX_SHADER_TOKEN_COUNT
            ),
        ));
    }
    let Some(&version_token) = tokens.first() else {
        return Err(err(0, "empty token stream"));
    };
    let version = decode_version_token(version_token)
        .ok_or_else(|| err(0, format!("unknown shader version token 0x{version_token:08x}")))?;
    let supported = match (version.stage, version.major) {
        (ShaderStage::Vertex, 1) => version.minor <= 1,
        (ShaderStage::Pixel, 1) => version.minor <= 4,
        (_, 2) => version.minor <= 1 || version.minor == 0xFF,
        (_, 3) => version.minor == 0,
        _ => false,
    };
    if !supported {
        return Err(err(
            0,
            format!("unsupported shader model {}.{}", version.major, version.minor),
        ));
    }

    let mut instructions = Vec::new();
    let mut token_index = 1usize;

    while token_index < tokens.len() {
        let opcode_token = tokens[token_index];
        let opcode = Opcode::from_raw((opcode_token & OPCODE_MASK) as u16);
        let location = InstructionLocation {
            instruction_index: instructions.len(),
            token_index,
        };

        if opcode == Opcode::Comment {
            let comment_len = ((opcode_token >> 16) & 0x7FFF) as usize;
            let end = token_index + 1 + comment_len;
            if end > tokens.len() {
                return Err(err(
                    token_index,
                    format!(
                        "comment length {comment_len} exceeds remaining tokens {}",
                        tokens.len() - token_index - 1
                    ),
                ));
            }
            instructions.push(DecodedInstruction {
                location,
                opcode,
                specific: 0,
                length: 1 + comment_len,
                coissue: false,
                result_modifier: ResultModifier::default(),
                predicate: None,
                operands: Vec::new(),
                dcl: None,
                comment_data: Some(tokens[token_index + 1..end].to_vec()),
            });
            token_index = end;
            continue;
        }

        if opcode == Opcode::End || opcode == Opcode::Phase {
            instructions.push(DecodedInstruction {
                location,
                opcode,
                specific: 0,
                length: 1,
                coissue: false,
                result_modifier: ResultModifier::default(),
                predicate: None,
                operands: Vec::new(),
                dcl: None,
                comment_data: None,
            });
            token_index += 1;
            if opcode == Opcode::End {
                break;
            }
            continue;
        }

        let Some(shape) = operand_shape(opcode, version) else {
            return Err(err(
                token_index,
                format!(
                    "opcode {} (0x{:x}) is not valid in {version}",
                    opcode.name(),
                    opcode.raw()
                ),
            ));
        };

        let predicated = (opcode_token & PREDICATED) != 0;
        let operand_tokens = if version.major >= 2 {
            // SM2+ stores the operand token count (excluding the opcode token) in bits 24..27.
            let length = ((opcode_token >> 24) & 0x0F) as usize;
            let end = token_index + 1 + length;
            if end > tokens.len() {
                return Err(err(
                    token_index,
                    format!(
                        "instruction length {length} exceeds remaining tokens {}",
                        tokens.len() - token_index - 1
                    ),
                ));
            }
            &tokens[token_index + 1..end]
        } else {
            // SM1 has no length field; every operand is exactly one token.
            let end = token_index + 1 + shape.len();
            if end > tokens.len() {
                return Err(err(token_index, "truncated instruction"));
            }
            &tokens[token_index + 1..end]
        };

        let mut cursor = OperandCursor {
            tokens: operand_tokens,
            pos: 0,
            base: token_index + 1,
            version,
        };
        let mut operands = Vec::with_capacity(shape.len());
        let mut predicate = None;
        let mut decl_token = None;
        let mut result_modifier = ResultModifier::default();

        for (slot, kind) in shape.iter().enumerate() {
            if predicated && slot == usize::from(shape.first() == Some(&OperandKind::Dst)) {
                predicate = Some(cursor.src()?);
            }
            match kind {
                OperandKind::Dst => {
                    result_modifier = decode_result_modifier(cursor.peek()?);
                    operands.push(Operand::Dst(cursor.dst()?));
                }
                OperandKind::Src => operands.push(Operand::Src(cursor.src()?)),
                OperandKind::Imm32 => operands.push(Operand::Imm32(cursor.next()?)),
                OperandKind::Decl => decl_token = Some(cursor.next()?),
            }
        }
        if predicated && predicate.is_none() {
            predicate = Some(cursor.src()?);
        }
        if let Some(pred) = &predicate {
            if pred.reg.file != RegisterFile::Predicate {
                return Err(err(
                    token_index,
                    format!("expected predicate register, got {:?}", pred.reg.file),
                ));
            }
        }
        if cursor.pos != operand_tokens.len() {
            return Err(err(
                token_index,
                format!(
                    "opcode {} decoded {} operand tokens but instruction has {}",
                    opcode.name(),
                    cursor.pos,
                    operand_tokens.len()
                ),
            ));
        }

        let dcl = match decl_token {
            Some(decl) => Some(decode_dcl(decl, &operands, token_index + 1)?),
            None => None,
        };

        instructions.push(DecodedInstruction {
            location,
            opcode,
            specific: ((opcode_token >> 16) & 0xFF) as u8,
            length: 1 + operand_tokens.len(),
            coissue: (opcode_token & COISSUE) != 0,
            result_modifier,
            predicate,
            operands,
            dcl,
            comment_data: None,
        });

        token_index += 1 + operand_tokens.len();
    }

    // Token streams must be terminated by `end`; a missing terminator means truncated input.
    if !matches!(instructions.last().map(|i| i.opcode), Some(Opcode::End)) {
        return Err(err(tokens.len().saturating_sub(1), "missing end token"));
    }

    Ok(DecodedShader {
        version,
        instructions,
    })
}

/// Operand layout of each opcode, or `None` when the opcode is not valid for the version.
fn operand_shape(opcode: Opcode, version: ShaderVersion) -> Option<&'static [OperandKind]> {
    use OperandKind::{Decl, Dst as D, Imm32 as I, Src as S};
    let pixel = version.stage == ShaderStage::Pixel;
    let ps_1_4 = pixel && version.major == 1 && version.minor == 4;
    let ps_1_x = pixel && version.major == 1;
    Some(match opcode {
        Opcode::Nop | Opcode::Ret | Opcode::Else | Opcode::EndIf | Opcode::EndLoop => &[],
        Opcode::EndRep | Opcode::Break => &[],
        Opcode::Mov
        | Opcode::Rcp
        | Opcode::Rsq
        | Opcode::Exp
        | Opcode::Log
        | Opcode::Lit
        | Opcode::Frc
        | Opcode::Abs
        | Opcode::Nrm
        | Opcode::ExpP
        | Opcode::LogP
        | Opcode::Mova => &[D, S],
        Opcode::Dsx | Opcode::Dsy if pixel => &[D, S],
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Dp3
        | Opcode::Dp4
        | Opcode::Min
        | Opcode::Max
        | Opcode::Slt
        | Opcode::Sge
        | Opcode::Dst
        | Opcode::Pow
        | Opcode::Crs
        | Opcode::M4x4
        | Opcode::M4x3
        | Opcode::M3x4
        | Opcode::M3x3
        | Opcode::M3x2
        | Opcode::Setp => &[D, S, S],
        Opcode::Mad | Opcode::Lrp | Opcode::Cnd | Opcode::Cmp | Opcode::Dp2Add | Opcode::Sgn => {
            &[D, S, S, S]
        }
        Opcode::SinCos if version.major >= 3 => &[D, S],
        Opcode::SinCos => &[D, S, S, S],
        Opcode::If | Opcode::Rep | Opcode::Call | Opcode::Label | Opcode::BreakP => &[S],
        Opcode::Ifc | Opcode::Breakc | Opcode::Loop | Opcode::CallNz => &[S, S],
        Opcode::Def | Opcode::DefI => &[D, I, I, I, I],
        Opcode::DefB => &[D, I],
        Opcode::Dcl => &[Decl, D],
        Opcode::Tex if ps_1_4 => &[D, S],
        Opcode::Tex if ps_1_x => &[D],
        Opcode::Tex if pixel || version.major >= 3 => &[D, S, S],
        Opcode::TexCoord if ps_1_4 => &[D, S],
        Opcode::TexCoord if ps_1_x => &[D],
        Opcode::TexKill | Opcode::TexDepth if pixel => &[D],
        Opcode::TexBem
        | Opcode::TexBemL
        | Opcode::TexReg2Ar
        | Opcode::TexReg2Gb
        | Opcode::TexM3x2Pad
        | Opcode::TexM3x2Tex
        | Opcode::TexM3x3Pad
        | Opcode::TexM3x3Tex
        | Opcode::TexM3x3VSpec
        | Opcode::TexReg2Rgb
        | Opcode::TexDp3Tex
        | Opcode::TexM3x2Depth
        | Opcode::TexDp3
        | Opcode::TexM3x3
            if ps_1_x =>
        {
            &[D, S]
        }
        Opcode::TexM3x3Spec | Opcode::Bem if ps_1_x => &[D, S, S],
        Opcode::TexLdd if version.major >= 2 => &[D, S, S, S, S],
        Opcode::TexLdl if version.major >= 3 => &[D, S, S],
        _ => return None,
    })
}

struct OperandCursor<'a> {
    tokens: &'a [u32],
    pos: usize,
    /// Absolute token index of `tokens[0]`, for error reporting.
    base: usize,
    version: ShaderVersion,
}

impl OperandCursor<'_> {
    fn peek(&self) -> Result<u32, DecodeError> {
        self.tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| err(self.base + self.pos, "unexpected end of operand tokens"))
    }

    fn next(&mut self) -> Result<u32, DecodeError> {
        let token = self.peek()?;
        self.pos += 1;
        Ok(token)
    }

    fn register(&mut self) -> Result<(RegisterRef, u32), DecodeError> {
        let at = self.base + self.pos;
        let token = self.next()?;
        let mut reg = self.register_from_token(token, at, RegDecodeContext::Operand)?;
        if (token & RELATIVE) != 0 {
            reg.relative = Some(if self.version.major >= 2 {
                let rel_at = self.base + self.pos;
                let rel_token = self.next()?;
                let rel = self.register_from_token(rel_token, rel_at, RegDecodeContext::Relative)?;
                if !matches!(rel.file, RegisterFile::Addr | RegisterFile::Loop) {
                    return Err(err(
                        rel_at,
                        format!("relative addressing through {:?}", rel.file),
                    ));
                }
                let rel_swizzle = Swizzle::from_raw(((rel_token & SWIZZLE_MASK) >> SWIZZLE_SHIFT) as u8);
                RelativeAddress {
                    file: rel.file,
                    index: rel.index,
                    component: rel_swizzle.0[0],
                }
            } else {
                // vs_1_1 relative addressing is always `a0.x` and has no extra token.
                RelativeAddress {
                    file: RegisterFile::Addr,
                    index: 0,
                    component: SwizzleComponent::X,
                }
            });
        }
        Ok((reg, token))
    }

    fn register_from_token(
        &self,
        token: u32,
        at: usize,
        ctx: RegDecodeContext,
    ) -> Result<RegisterRef, DecodeError> {
        let index = token & REGNUM_MASK;
        let regtype = (((token & REGTYPE_MASK) >> REGTYPE_SHIFT)
            | ((token & REGTYPE_MASK2) >> REGTYPE_SHIFT2)) as u8;
        let file = RegisterFile::from_raw(regtype, self.version, ctx)
            .ok_or_else(|| err(at, format!("unsupported register type {regtype}")))?;
        if index > file.max_index() {
            return Err(err(
                at,
                format!(
                    "register index {index} in {file:?} exceeds maximum {}",
                    file.max_index()
                ),
            ));
        }
        Ok(RegisterRef {
            file,
            index,
            relative: None,
        })
    }

    fn dst(&mut self) -> Result<DstOperand, DecodeError> {
        let (reg, token) = self.register()?;
        let mask = ((token & WRITEMASK_MASK) >> WRITEMASK_SHIFT) as u8;
        Ok(DstOperand {
            reg,
            mask: WriteMask(if mask == 0 { 0xF } else { mask }),
        })
    }

    fn src(&mut self) -> Result<SrcOperand, DecodeError> {
        let at = self.base + self.pos;
        let (reg, token) = self.register()?;
        let modifier_raw = ((token & SRCMOD_MASK) >> SRCMOD_SHIFT) as u8;
        let modifier = SrcModifier::from_raw(modifier_raw)
            .ok_or_else(|| err(at, format!("unknown source modifier {modifier_raw}")))?;
        Ok(SrcOperand {
            reg,
            swizzle: Swizzle::from_raw(((token & SWIZZLE_MASK) >> SWIZZLE_SHIFT) as u8),
            modifier,
        })
    }
}

fn decode_dcl(decl: u32, operands: &[Operand], at: usize) -> Result<DclInfo, DecodeError> {
    let is_sampler = matches!(
        operands.first(),
        Some(Operand::Dst(dst)) if dst.reg.file == RegisterFile::Sampler
    );
    let usage_index = ((decl >> 16) & 0xF) as u8;
    if is_sampler {
        let ty = match (decl >> 27) & 0xF {
            // 1D textures are sampled as 2D with a height of one.
            1 | 2 => TextureType::Texture2D,
            3 => TextureType::TextureCube,
            4 => TextureType::Texture3D,
            other => return Err(err(at, format!("unsupported sampler texture type {other}"))),
        };
        return Ok(DclInfo {
            usage: DclUsage::TextureType(ty),
            usage_index: 0,
        });
    }
    let usage_raw = decl & 0x1F;
    let usage =
        Usage::from_raw(usage_raw).ok_or_else(|| err(at, format!("unknown usage {usage_raw}")))?;
    Ok(DclInfo {
        usage: DclUsage::Usage(usage),
        usage_index,
    })
}

/// Result modifiers live in the destination token (`D3DSP_DSTMOD_*` and `D3DSP_DSTSHIFT_*`).
fn decode_result_modifier(dst_token: u32) -> ResultModifier {
    let mod_bits = (dst_token >> 20) & 0xF;
    let shift = match (dst_token >> 24) & 0xF {
        1 => ResultShift::Mul2,
        2 => ResultShift::Mul4,
        3 => ResultShift::Mul8,
        0xF => ResultShift::Div2,
        0xE => ResultShift::Div4,
        0xD => ResultShift::Div8,
        _ => ResultShift::None,
    };
    ResultModifier {
        saturate: (mod_bits & 0x1) != 0,
        partial_precision: (mod_bits & 0x2) != 0,
        centroid: (mod_bits & 0x4) != 0,
        shift,
    }
}

const OPCODE_MASK: u32 = 0x0000_FFFF;
const COISSUE: u32 = 0x4000_0000;
const PREDICATED: u32 = 0x1000_0000;

const REGNUM_MASK: u32 = 0x0000_07FF;
const REGTYPE_MASK: u32 = 0x7000_0000;
const REGTYPE_SHIFT: u32 = 28;
const REGTYPE_MASK2: u32 = 0x0000_1800;
const REGTYPE_SHIFT2: u32 = 8;
const RELATIVE: u32 = 0x0000_2000;

const WRITEMASK_MASK: u32 = 0x000F_0000;
const WRITEMASK_SHIFT: u32 = 16;

const SWIZZLE_MASK: u32 = 0x00FF_0000;
const SWIZZLE_SHIFT: u32 = 16;

const SRCMOD_MASK: u32 = 0x0F00_0000;
const SRCMOD_SHIFT: u32 = 24;
