//! Public data model shared by the decoder, the code generators and the runtime crates.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    /// Prefix used for every generated identifier of this stage (`vs_c0`, `ps_uniforms_vec4`).
    pub fn prefix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderVersion {
    pub stage: ShaderStage,
    pub major: u8,
    pub minor: u8,
}

impl ShaderVersion {
    pub fn is_sm1(&self) -> bool {
        self.major == 1
    }

    pub fn is_sm3(&self) -> bool {
        self.major == 3
    }

    /// Returns true when the version is at least `major.minor`.
    pub fn at_least(&self, major: u8, minor: u8) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for ShaderVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.stage.prefix(), self.major, self.minor)
    }
}

/// Vertex input / interpolator semantic (`D3DDECLUSAGE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Usage {
    Position,
    BlendWeight,
    BlendIndices,
    Normal,
    PointSize,
    TexCoord,
    Tangent,
    Binormal,
    TessFactor,
    PositionT,
    Color,
    Fog,
    Depth,
    Sample,
}

impl Usage {
    /// Number of distinct usages; sizes the per-usage attribute location tables.
    pub const COUNT: usize = 14;

    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Position,
            1 => Self::BlendWeight,
            2 => Self::BlendIndices,
            3 => Self::Normal,
            4 => Self::PointSize,
            5 => Self::TexCoord,
            6 => Self::Tangent,
            7 => Self::Binormal,
            8 => Self::TessFactor,
            9 => Self::PositionT,
            10 => Self::Color,
            11 => Self::Fog,
            12 => Self::Depth,
            13 => Self::Sample,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::BlendWeight => "blendweight",
            Self::BlendIndices => "blendindices",
            Self::Normal => "normal",
            Self::PointSize => "psize",
            Self::TexCoord => "texcoord",
            Self::Tangent => "tangent",
            Self::Binormal => "binormal",
            Self::TessFactor => "tessfactor",
            Self::PositionT => "positiont",
            Self::Color => "color",
            Self::Fog => "fog",
            Self::Depth => "depth",
            Self::Sample => "sample",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Bool,
}

/// A constant register range the runtime must feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uniform {
    pub ty: UniformType,
    pub index: u32,
    /// Zero for a single register, otherwise the number of registers in a relatively addressed
    /// range.
    pub array_count: u32,
    /// The range is entirely covered by `def` instructions; its values come from
    /// [`crate::ParseData::constants`] instead of the register files.
    pub constant: bool,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Float([f32; 4]),
    Int([i32; 4]),
    Bool(bool),
}

/// A `def`/`defi`/`defb` literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    pub index: u32,
    pub value: ConstantValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerType {
    TwoD,
    Cube,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampler {
    pub ty: SamplerType,
    pub index: u32,
    pub name: String,
    /// Sampled by `texbem`/`texbeml`; the runtime appends two bump-environment vec4s per such
    /// sampler to the pixel float array.
    pub texbem: bool,
}

/// Caller-supplied sampler type for ps_1_x shaders, which never declare sampler dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerMap {
    pub index: u32,
    pub ty: SamplerType,
}

/// A vertex input or an interpolated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub usage: Usage,
    pub index: u32,
    /// `v#`/`o#` register number. Assembly profiles bind vertex inputs by this slot.
    pub register: u32,
    pub name: String,
}

/// Reorders the channels of one vertex input before the shader sees it.
///
/// `swizzles[i]` is the source channel (0-3) feeding channel `i`, so `[2, 1, 0, 3]` turns BGRA
/// vertex colors into RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeSwizzle {
    pub usage: Usage,
    pub index: u32,
    pub swizzles: [u8; 4],
}

/// `D3DXREGISTER_SET`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolRegisterSet {
    Bool,
    Int4,
    Float4,
    Sampler,
}

impl SymbolRegisterSet {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Bool,
            1 => Self::Int4,
            2 => Self::Float4,
            3 => Self::Sampler,
            _ => return None,
        })
    }
}

/// `D3DXPARAMETER_CLASS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolClass {
    Scalar,
    Vector,
    MatrixRows,
    MatrixColumns,
    Object,
    Struct,
}

impl SymbolClass {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Scalar,
            1 => Self::Vector,
            2 => Self::MatrixRows,
            3 => Self::MatrixColumns,
            4 => Self::Object,
            5 => Self::Struct,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Scalar, vector or matrix: the classes whose values are plain register data.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Scalar | Self::Vector | Self::MatrixRows | Self::MatrixColumns
        )
    }
}

/// `D3DXPARAMETER_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolType {
    Void,
    Bool,
    Int,
    Float,
    String,
    Texture,
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
    Sampler,
    Sampler1D,
    Sampler2D,
    Sampler3D,
    SamplerCube,
    PixelShader,
    VertexShader,
    PixelFragment,
    VertexFragment,
    Unsupported,
}

impl SymbolType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Void,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::String,
            5 => Self::Texture,
            6 => Self::Texture1D,
            7 => Self::Texture2D,
            8 => Self::Texture3D,
            9 => Self::TextureCube,
            10 => Self::Sampler,
            11 => Self::Sampler1D,
            12 => Self::Sampler2D,
            13 => Self::Sampler3D,
            14 => Self::SamplerCube,
            15 => Self::PixelShader,
            16 => Self::VertexShader,
            17 => Self::PixelFragment,
            18 => Self::VertexFragment,
            _ => Self::Unsupported,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            Self::Texture | Self::Texture1D | Self::Texture2D | Self::Texture3D | Self::TextureCube
        )
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            Self::Sampler | Self::Sampler1D | Self::Sampler2D | Self::Sampler3D | Self::SamplerCube
        )
    }

    pub fn is_shader(self) -> bool {
        matches!(self, Self::PixelShader | Self::VertexShader)
    }

    /// Bool, int or float: the only types allowed inside numeric classes and struct members.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float)
    }
}

/// Recursive type description for a constant-table or effect symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTypeInfo {
    pub class: SymbolClass,
    pub ty: SymbolType,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub info: SymbolTypeInfo,
}

/// A named constant from the `CTAB` comment block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub register_set: SymbolRegisterSet,
    pub register_index: u32,
    pub register_count: u32,
    pub info: SymbolTypeInfo,
}

/// A non-fatal problem found while translating one shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Token offset in the bytecode, when the error is tied to one instruction.
    pub position: Option<usize>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(position) => write!(f, "token {position}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ParseError {}
