use image::{DynamicImage, ImageBuffer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;

use super::reader::{check_plane, SeriesReader};
use super::series::SeriesInfo;
use crate::{AlignError, Result};

/// Multi-IFD TIFF reader.
///
/// When every IFD shares one geometry the file is a plane stack: a single
/// series holding one image per IFD. Otherwise (pyramidal slides) each IFD is
/// its own single-image series, in file order.
pub struct TiffSeriesReader {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    series: Vec<SeriesInfo>,
    /// IFD index for every (series, image) plane.
    planes: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IfdInfo {
    width: u32,
    height: u32,
    color: ColorType,
}

impl TiffSeriesReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut decoder = open_decoder(path)?;
        let mut ifds = Vec::new();

        loop {
            let (width, height) = decoder.dimensions().map_err(|e| AlignError::decode(path, e))?;
            let color = decoder.colortype().map_err(|e| AlignError::decode(path, e))?;
            ifds.push(IfdInfo { width, height, color });

            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(|e| AlignError::decode(path, e))?;
        }

        let (series, planes) = group_series(&ifds);
        tracing::debug!(path = %path.display(), ifds = ifds.len(), series = series.len(), "TIFF geometry read");

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            series,
            planes,
        })
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| AlignError::io(path, e))?;
    let decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| AlignError::decode(path, e))?
        .with_limits(Limits::unlimited());
    Ok(decoder)
}

fn group_series(ifds: &[IfdInfo]) -> (Vec<SeriesInfo>, Vec<Vec<usize>>) {
    let uniform = ifds.windows(2).all(|pair| pair[0] == pair[1]);
    if uniform {
        let first = ifds[0];
        let info = series_info(first).with_image_count(ifds.len());
        (vec![info], vec![(0..ifds.len()).collect()])
    } else {
        let series = ifds.iter().map(|ifd| series_info(*ifd)).collect();
        let planes = (0..ifds.len()).map(|i| vec![i]).collect();
        (series, planes)
    }
}

fn series_info(ifd: IfdInfo) -> SeriesInfo {
    let (channels, bits) = channel_layout(ifd.color);
    SeriesInfo::new(ifd.width, ifd.height, channels).with_bytes_per_sample(bits.div_ceil(8).max(1))
}

fn channel_layout(color: ColorType) -> (u8, u8) {
    match color {
        ColorType::Gray(bits) | ColorType::Palette(bits) => (1, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) | ColorType::YCbCr(bits) => (3, bits),
        ColorType::RGBA(bits) | ColorType::CMYK(bits) => (4, bits),
        _ => (3, 8),
    }
}

fn to_dynamic(path: &Path, width: u32, height: u32, color: ColorType, data: DecodingResult) -> Result<DynamicImage> {
    let malformed = || AlignError::decode(path, "pixel buffer does not match the declared geometry");
    let image = match (color, data) {
        (ColorType::Gray(8), DecodingResult::U8(buf)) => {
            DynamicImage::ImageLuma8(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::GrayA(8), DecodingResult::U8(buf)) => {
            DynamicImage::ImageLumaA8(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) => {
            DynamicImage::ImageRgb8(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
            DynamicImage::ImageRgba8(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::Gray(16), DecodingResult::U16(buf)) => {
            DynamicImage::ImageLuma16(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::RGB(16), DecodingResult::U16(buf)) => {
            DynamicImage::ImageRgb16(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (ColorType::RGBA(16), DecodingResult::U16(buf)) => {
            DynamicImage::ImageRgba16(ImageBuffer::from_raw(width, height, buf).ok_or_else(malformed)?)
        }
        (other, _) => {
            return Err(AlignError::decode(path, format!("unsupported TIFF sample layout {other:?}")));
        }
    };
    Ok(image)
}

impl SeriesReader for TiffSeriesReader {
    fn format_name(&self) -> &'static str {
        "TIFF"
    }

    fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    fn read_image(&mut self, series: usize, image: usize) -> Result<DynamicImage> {
        check_plane(&self.series, series, image)?;
        let ifd = self.planes[series][image];
        let path = self.path.as_path();

        self.decoder.seek_to_image(ifd).map_err(|e| AlignError::decode(path, e))?;
        let (width, height) = self.decoder.dimensions().map_err(|e| AlignError::decode(path, e))?;
        let color = self.decoder.colortype().map_err(|e| AlignError::decode(path, e))?;
        let data = self.decoder.read_image().map_err(|e| AlignError::decode(path, e))?;
        to_dynamic(path, width, height, color, data)
    }

    fn reopen(&self) -> Result<Box<dyn SeriesReader>> {
        Ok(Box::new(Self::open(&self.path)?))
    }
}
