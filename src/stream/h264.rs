//! Codec configuration parsing
//!
//! Configuration packets carry the codec's parameter sets in Annex B form.
//! For H.264 the sequence parameter set gives the coded size and the
//! cropping window, from which the displayed size is derived.

use crate::error::DecodeParseError;
use crate::mirror::VideoCodec;

/// NAL unit type of a sequence parameter set
const NAL_TYPE_SPS: u8 = 7;

/// Profiles whose SPS carries chroma format and scaling matrices
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Displayed frame size after cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CroppedSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Extracts the displayed frame size from a configuration packet
pub trait ConfigurationParser: Send + Sync {
    /// Parses a configuration record
    fn parse(&self, data: &[u8]) -> Result<CroppedSize, DecodeParseError>;
}

/// Parser for H.264 Annex B configuration records
#[derive(Debug, Clone, Copy, Default)]
pub struct H264ConfigurationParser;

/// Parser for codecs whose configuration records are not interpreted
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedConfigurationParser(&'static str);

/// Returns the configuration parser for a codec
pub fn parser_for(codec: VideoCodec) -> Box<dyn ConfigurationParser> {
    match codec {
        VideoCodec::H264 => Box::new(H264ConfigurationParser),
        VideoCodec::H265 => Box::new(UnsupportedConfigurationParser("h265")),
    }
}

impl ConfigurationParser for UnsupportedConfigurationParser {
    fn parse(&self, _data: &[u8]) -> Result<CroppedSize, DecodeParseError> {
        Err(DecodeParseError::Unsupported(self.0))
    }
}

impl ConfigurationParser for H264ConfigurationParser {
    fn parse(&self, data: &[u8]) -> Result<CroppedSize, DecodeParseError> {
        let sps = nal_units(data)
            .find(|nal| nal.first().map(|h| h & 0x1f) == Some(NAL_TYPE_SPS))
            .ok_or(DecodeParseError::MissingSps)?;

        let rbsp = unescape(&sps[1..]);
        parse_sps(&rbsp)
    }
}

/// Iterates NAL unit payloads of an Annex B byte stream
fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let ends: Vec<usize> = starts
        .iter()
        .skip(1)
        .map(|&next| {
            // Strip the start code and any zero bytes leading into it
            let mut end = next - 3;
            while end > 0 && data[end - 1] == 0 {
                end -= 1;
            }
            end
        })
        .chain(std::iter::once(data.len()))
        .collect();

    starts
        .into_iter()
        .zip(ends)
        .filter(|(start, end)| start < end)
        .map(move |(start, end)| &data[start..end])
}

/// Removes emulation prevention bytes (00 00 03 -> 00 00)
fn unescape(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &byte in nal {
        if zeros >= 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

fn parse_sps(rbsp: &[u8]) -> Result<CroppedSize, DecodeParseError> {
    let mut bits = BitReader::new(rbsp);

    let profile_idc = bits.read_bits(8)? as u8;
    bits.skip(16)?; // constraint flags, level_idc
    bits.read_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = bits.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(DecodeParseError::InvalidValue {
                field: "chroma_format_idc",
                value: chroma_format_idc,
            });
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = bits.read_flag()?;
        }
        bits.read_ue()?; // bit_depth_luma_minus8
        bits.read_ue()?; // bit_depth_chroma_minus8
        bits.skip(1)?; // qpprime_y_zero_transform_bypass_flag
        if bits.read_flag()? {
            let lists = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..lists {
                if bits.read_flag()? {
                    skip_scaling_list(&mut bits, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    bits.read_ue()?; // log2_max_frame_num_minus4
    match bits.read_ue()? {
        0 => {
            bits.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            bits.skip(1)?;
            bits.read_se()?;
            bits.read_se()?;
            let cycle = bits.read_ue()?;
            for _ in 0..cycle {
                bits.read_se()?;
            }
        }
        _ => {}
    }

    bits.read_ue()?; // max_num_ref_frames
    bits.skip(1)?; // gaps_in_frame_num_value_allowed_flag

    let width_in_mbs = bits.read_ue()? + 1;
    let height_in_map_units = bits.read_ue()? + 1;
    let frame_mbs_only = bits.read_flag()?;
    if !frame_mbs_only {
        bits.skip(1)?; // mb_adaptive_frame_field_flag
    }
    bits.skip(1)?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if bits.read_flag()? {
        crop_left = bits.read_ue()?;
        crop_right = bits.read_ue()?;
        crop_top = bits.read_ue()?;
        crop_bottom = bits.read_ue()?;
    }

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let width = checked(width_in_mbs.checked_mul(16), "pic_width_in_mbs_minus1", width_in_mbs)?;
    let height = checked(
        height_in_map_units.checked_mul(16 * field_factor),
        "pic_height_in_map_units_minus1",
        height_in_map_units,
    )?;

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = match chroma_array_type {
        0 => (1, field_factor),
        1 => (2, 2 * field_factor),
        2 => (2, field_factor),
        _ => (1, field_factor),
    };

    let width = checked(
        crop_left
            .checked_add(crop_right)
            .and_then(|crop| crop.checked_mul(crop_unit_x))
            .and_then(|crop| width.checked_sub(crop)),
        "frame_crop_right_offset",
        crop_right,
    )?;
    let height = checked(
        crop_top
            .checked_add(crop_bottom)
            .and_then(|crop| crop.checked_mul(crop_unit_y))
            .and_then(|crop| height.checked_sub(crop)),
        "frame_crop_bottom_offset",
        crop_bottom,
    )?;

    Ok(CroppedSize { width, height })
}

fn checked(
    value: Option<u32>,
    field: &'static str,
    read: u32,
) -> Result<u32, DecodeParseError> {
    value.ok_or(DecodeParseError::InvalidValue { field, value: read })
}

fn skip_scaling_list(bits: &mut BitReader<'_>, size: usize) -> Result<(), DecodeParseError> {
    // delta_scale is unbounded on the wire
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = i64::from(bits.read_se()?);
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// MSB-first bit reader with exp-Golomb support
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_bit(&mut self) -> Result<u32, DecodeParseError> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or(DecodeParseError::Truncated(self.position))?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(u32::from(bit))
    }

    fn read_flag(&mut self) -> Result<bool, DecodeParseError> {
        Ok(self.read_bit()? == 1)
    }

    fn read_bits(&mut self, count: u32) -> Result<u32, DecodeParseError> {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    fn skip(&mut self, count: usize) -> Result<(), DecodeParseError> {
        if self.position + count > self.data.len() * 8 {
            return Err(DecodeParseError::Truncated(self.position));
        }
        self.position += count;
        Ok(())
    }

    fn read_ue(&mut self) -> Result<u32, DecodeParseError> {
        let start = self.position;
        let mut leading_zeros = 0;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DecodeParseError::InvalidExpGolomb(start));
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }

    fn read_se(&mut self) -> Result<i32, DecodeParseError> {
        let code = self.read_ue()?;
        let magnitude = ((code + 1) / 2) as i32;
        Ok(if code % 2 == 1 { magnitude } else { -magnitude })
    }
}
