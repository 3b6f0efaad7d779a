//! Headerless raw voxel grids.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::scene::{GridLayout, VolumeGrid};
use crate::util::{Error, IVec3, Result, Vec2, Vec3};

/// Storage type of one voxel on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoxelType {
    UChar,
    Short,
    UShort,
    Int,
    #[default]
    Float,
    Double,
}

impl VoxelType {
    /// Size of one voxel in bytes.
    pub fn size(self) -> usize {
        match self {
            VoxelType::UChar => 1,
            VoxelType::Short | VoxelType::UShort => 2,
            VoxelType::Int | VoxelType::Float => 4,
            VoxelType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VoxelType::UChar => "uchar",
            VoxelType::Short => "short",
            VoxelType::UShort => "ushort",
            VoxelType::Int => "int",
            VoxelType::Float => "float",
            VoxelType::Double => "double",
        }
    }

    /// Decode `count` little-endian voxels into `f32`.
    fn decode(self, bytes: &[u8], count: usize) -> Vec<f32> {
        let bytes = &bytes[..count * self.size()];
        match self {
            VoxelType::UChar => bytes.iter().map(|&v| v as f32).collect(),
            VoxelType::Short => {
                let mut out = vec![0i16; count];
                LittleEndian::read_i16_into(bytes, &mut out);
                out.into_iter().map(|v| v as f32).collect()
            }
            VoxelType::UShort => {
                let mut out = vec![0u16; count];
                LittleEndian::read_u16_into(bytes, &mut out);
                out.into_iter().map(|v| v as f32).collect()
            }
            VoxelType::Int => {
                let mut out = vec![0i32; count];
                LittleEndian::read_i32_into(bytes, &mut out);
                out.into_iter().map(|v| v as f32).collect()
            }
            VoxelType::Float => {
                let mut out = vec![0f32; count];
                LittleEndian::read_f32_into(bytes, &mut out);
                out
            }
            VoxelType::Double => {
                let mut out = vec![0f64; count];
                LittleEndian::read_f64_into(bytes, &mut out);
                out.into_iter().map(|v| v as f32).collect()
            }
        }
    }
}

impl fmt::Display for VoxelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VoxelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uchar" | "u8" => Ok(VoxelType::UChar),
            "short" | "i16" => Ok(VoxelType::Short),
            "ushort" | "u16" => Ok(VoxelType::UShort),
            "int" | "i32" => Ok(VoxelType::Int),
            "float" | "f32" => Ok(VoxelType::Float),
            "double" | "f64" => Ok(VoxelType::Double),
            other => Err(Error::invalid(format!("unknown voxel type '{other}'"))),
        }
    }
}

/// Grid description for raw volumes. Copied into every import.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    pub dimensions: IVec3,
    pub voxel_type: VoxelType,
    pub grid_origin: Vec3,
    pub grid_spacing: Vec3,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            dimensions: IVec3::ZERO,
            voxel_type: VoxelType::Float,
            grid_origin: Vec3::ZERO,
            grid_spacing: Vec3::ONE,
        }
    }
}

impl VolumeParams {
    /// Voxel count, or an error for non-positive dimensions.
    pub fn voxel_count(&self) -> Result<usize> {
        let d = self.dimensions;
        if d.x <= 0 || d.y <= 0 || d.z <= 0 {
            return Err(Error::invalid("invalid volume dimensions"));
        }
        (d.x as usize)
            .checked_mul(d.y as usize)
            .and_then(|n| n.checked_mul(d.z as usize))
            .ok_or_else(|| Error::invalid("invalid volume dimensions"))
    }
}

/// Load a raw little-endian voxel file into a grid.
///
/// Bytes past the expected voxel count are ignored.
pub fn load_raw_volume(
    path: &Path,
    params: &VolumeParams,
    layout: GridLayout,
) -> Result<VolumeGrid> {
    let count = params.voxel_count()?;
    let bytes = std::fs::read(path).map_err(|e| Error::file_open(path, e))?;

    let needed = count
        .checked_mul(params.voxel_type.size())
        .ok_or_else(|| Error::invalid("invalid volume dimensions"))?;
    if bytes.len() < needed {
        return Err(Error::file_open(
            path,
            "read incomplete data (truncated file or wrong format?!)",
        ));
    }

    let voxels = params.voxel_type.decode(&bytes, count);
    let value_range = voxels
        .iter()
        .fold(Vec2::new(f32::INFINITY, f32::NEG_INFINITY), |r, &v| {
            Vec2::new(r.x.min(v), r.y.max(v))
        });
    tracing::debug!(
        path = %path.display(),
        voxels = count,
        voxel_type = %params.voxel_type,
        min = value_range.x,
        max = value_range.y,
        "loaded raw volume"
    );

    Ok(VolumeGrid {
        layout,
        dimensions: params.dimensions.as_uvec3(),
        origin: params.grid_origin,
        spacing: params.grid_spacing,
        voxels: voxels.into(),
        value_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::UVec3;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn params(dims: [i32; 3], voxel_type: VoxelType) -> VolumeParams {
        VolumeParams {
            dimensions: IVec3::from_array(dims),
            voxel_type,
            ..VolumeParams::default()
        }
    }

    fn load(
        path: &Path,
        dims: [i32; 3],
        voxel_type: VoxelType,
        layout: GridLayout,
    ) -> Result<VolumeGrid> {
        load_raw_volume(path, &params(dims, voxel_type), layout)
    }

    #[test]
    fn test_load_uchar() {
        let file = write_temp(&[0, 10, 20, 30, 40, 50, 60, 255]);
        let grid = load(file.path(), [2, 2, 2], VoxelType::UChar, GridLayout::Structured).unwrap();
        assert_eq!(grid.dimensions, UVec3::splat(2));
        assert_eq!(grid.voxel(1, 0, 0), 10.0);
        assert_eq!(grid.voxel(1, 1, 1), 255.0);
        assert_eq!(grid.value_range, Vec2::new(0.0, 255.0));
    }

    #[test]
    fn test_load_short_little_endian() {
        let mut bytes = Vec::new();
        for v in [-300i16, 7] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let file = write_temp(&bytes);
        let grid = load(file.path(), [2, 1, 1], VoxelType::Short, GridLayout::Structured).unwrap();
        assert_eq!(&grid.voxels[..], &[-300.0, 7.0]);
        assert_eq!(grid.value_range, Vec2::new(-300.0, 7.0));
    }

    #[test]
    fn test_load_double_ignores_trailing_bytes() {
        let mut bytes = Vec::new();
        for v in [0.5f64, 1.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(0xff);
        let file = write_temp(&bytes);
        let grid = load(file.path(), [1, 2, 1], VoxelType::Double, GridLayout::Spherical).unwrap();
        assert_eq!(&grid.voxels[..], &[0.5, 1.5]);
        assert_eq!(grid.layout, GridLayout::Spherical);
    }

    #[test]
    fn test_truncated_file() {
        let file = write_temp(&[0u8; 12]);
        let err = load(file.path(), [2, 2, 1], VoxelType::Float, GridLayout::Structured)
            .unwrap_err();
        assert!(err.to_string().contains("read incomplete data"));
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn test_invalid_dimensions() {
        let file = write_temp(&[0u8; 4]);
        let err = load(file.path(), [1, 0, 1], VoxelType::UChar, GridLayout::Structured)
            .unwrap_err();
        assert!(err.to_string().contains("invalid volume dimensions"));
        let err = load(file.path(), [1, -2, 1], VoxelType::UChar, GridLayout::Structured)
            .unwrap_err();
        assert!(err.to_string().contains("invalid volume dimensions"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.raw");
        let err = load(&missing, [1, 1, 1], VoxelType::UChar, GridLayout::Structured)
            .unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn test_voxel_type_parse() {
        assert_eq!("ushort".parse::<VoxelType>().unwrap(), VoxelType::UShort);
        assert_eq!("F64".parse::<VoxelType>().unwrap(), VoxelType::Double);
        assert!("half".parse::<VoxelType>().is_err());
        assert_eq!(VoxelType::Int.to_string(), "int");
    }
}
