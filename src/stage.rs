use std::fmt;
use std::path::Path;

/// Shader pipeline stage, inferred from the source file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
    TessControl,
    TessEval,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
        ShaderStage::Compute,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
    ];

    /// Infers the stage from a file extension (without the dot).
    ///
    /// Matching is case-insensitive and keys off the first letter, with a few
    /// exclusions for files that commonly live next to shaders:
    /// `.vc*` project files, `.fi*` filter files and `.gl*` include files.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        let mut chars = ext.chars();
        let first = chars.next()?;
        let second = chars.next();

        match first {
            'v' if second != Some('c') => Some(ShaderStage::Vertex),
            'f' if second != Some('i') => Some(ShaderStage::Fragment),
            'g' if second != Some('l') => Some(ShaderStage::Geometry),
            'c' => Some(ShaderStage::Compute),
            't' if ext == "tesc" => Some(ShaderStage::TessControl),
            't' if ext == "tese" => Some(ShaderStage::TessEval),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Tag written into generated definition units.
    pub fn tag(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "SHADER_STAGE_VERTEX",
            ShaderStage::Fragment => "SHADER_STAGE_FRAGMENT",
            ShaderStage::Geometry => "SHADER_STAGE_GEOMETRY",
            ShaderStage::Compute => "SHADER_STAGE_COMPUTE",
            ShaderStage::TessControl => "SHADER_STAGE_TESS_CONTROL",
            ShaderStage::TessEval => "SHADER_STAGE_TESS_EVAL",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Compute => "compute",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEval => "tessellation evaluation",
        };
        f.write_str(name)
    }
}

/// Returns true if the path names a compilable shader module.
pub fn is_shader_module(path: &Path) -> bool {
    ShaderStage::from_path(path).is_some()
}
