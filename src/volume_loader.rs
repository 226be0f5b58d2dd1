use crate::{enums::SortBy, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::{Vector2, Vector3};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

/// Spacing used when the data set does not say.
const DEFAULT_SPACING_MM: f32 = 1.0;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// One decoded slice and the keys used to place it in the stack.
struct Slice {
    order: Option<f32>,
    position: Option<Vector3<f32>>,
    image: Array2<f32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let started = Instant::now();
        let mut slices: Vec<Slice> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, sort_by))
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let spacing = Self::get_spacing(dicom_objects, &slices);
        let volume_array = Self::build_volume_array(&slices);
        let volume = Volume::new(volume_array, spacing);

        info!(
            slices = slices.len(),
            dim = ?volume.dim(),
            spacing = ?(spacing.x, spacing.y, spacing.z),
            range = ?volume.scalar_range(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded volume"
        );
        Ok(volume)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from every DICOM file in a directory
    ///
    /// Files are recognised by content, not extension; anything that does
    /// not parse as DICOM is skipped.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path) {
                Ok(object) => Some(object),
                Err(err) => {
                    debug!(path = %path.display(), %err, "skipping non-DICOM file");
                    None
                }
            })
            .collect();

        if objects.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        debug!(
            directory = %path.as_ref().display(),
            files = paths.len(),
            dicom = objects.len(),
            "scanned directory"
        );

        Self::load_from_dicom_objects(&objects, sort_by)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<Slice> {
        let image = Self::decode_image(dicom_object)?;
        let position = Self::get_position(dicom_object);
        let order = Self::get_sort_order(dicom_object, position.as_ref(), sort_by);
        Some(Slice {
            order,
            position,
            image,
        })
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Vector3<f32>> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?;
        match pos.as_slice() {
            [x, y, z, ..] => Some(Vector3::new(*x, *y, *z)),
            _ => None,
        }
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        position: Option<&Vector3<f32>>,
        sort_by: SortBy,
    ) -> Option<f32> {
        let key = match sort_by {
            SortBy::ImagePositionPatient => position.map(|p| p.z),
            SortBy::TablePosition => dicom_object
                .element(tags::TABLE_POSITION)
                .ok()?
                .to_float32()
                .ok(),
            SortBy::InstanceNumber => dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()?
                .to_int::<i32>()
                .ok()
                .map(|n| n as f32),
            SortBy::None => None,
        };
        key.filter(|value| !value.is_nan())
    }

    /// First frame, modality LUT applied, no VOI windowing.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = match dicom_object.decode_pixel_data() {
            Ok(pixel_data) => pixel_data,
            Err(err) => {
                debug!(%err, "object has no decodable pixel data");
                return None;
            }
        };
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    /// Stable ascending sort; slices without a key keep their input order in front.
    fn sort_slices(slices: &mut [Slice], sort_by: SortBy) {
        if matches!(sort_by, SortBy::None) {
            return;
        }
        slices.sort_by(|a, b| match (a.order, b.order) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        });
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }

    /// `(x, y, z)` spacing in mm.
    fn get_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        slices: &[Slice],
    ) -> Vector3<f32> {
        // PixelSpacing is (row spacing, column spacing), i.e. (y, x)
        let in_plane = dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;
            match pixel_spacing.as_slice() {
                [row, col, ..] if *row > 0.0 && *col > 0.0 => Some(Vector2::new(*col, *row)),
                _ => None,
            }
        });
        let in_plane = in_plane.unwrap_or_else(|| {
            warn!("PixelSpacing missing, assuming {DEFAULT_SPACING_MM} mm");
            Vector2::repeat(DEFAULT_SPACING_MM)
        });

        let between_slices = match slices {
            [first, second, ..] => first
                .position
                .zip(second.position)
                .map(|(a, b)| (b - a).norm())
                .filter(|distance| *distance > f32::EPSILON),
            _ => None,
        };
        let thickness = || {
            dicom_objects.iter().find_map(|dicom_object| {
                dicom_object
                    .element(tags::SLICE_THICKNESS)
                    .ok()?
                    .to_float32()
                    .ok()
                    .filter(|thickness| *thickness > 0.0)
            })
        };
        let slice_spacing = between_slices.or_else(thickness).unwrap_or_else(|| {
            if slices.len() > 1 {
                warn!("slice spacing unknown, assuming {DEFAULT_SPACING_MM} mm");
            }
            DEFAULT_SPACING_MM
        });

        Vector3::new(in_plane.x, in_plane.y, slice_spacing)
    }
}
