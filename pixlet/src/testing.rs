//! Fixture helpers shared by unit tests.

use std::io::Cursor;

pub(crate) fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let img = image::RgbaImage::from_raw(width, height, rgba.to_vec()).unwrap();
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub(crate) fn solid_png(width: u32, height: u32, px: [u8; 4]) -> Vec<u8> {
    encode_png(width, height, &px.repeat((width * height) as usize))
}
