use anyhow::Error;
use ndarray::{Array2, Array3};
use opencv::core::{Mat, MatTraitConst, MatTraitConstManual, MatTraitManual, Scalar, Size, Vec3b, Vec3f, Vector, CV_32FC1, CV_32FC3, CV_8UC1, CV_8UC3};
use opencv::imgcodecs::{imdecode, imencode, imread, imwrite, IMREAD_COLOR};
use opencv::imgproc::{gaussian_blur_def, resize, INTER_LINEAR};
use crate::utils::utils::saturate_u8;

/// decode_image turns encoded image bytes into a BGR matrix.
pub fn decode_image(im_bytes: &[u8]) -> Result<Mat, Error> {
    let img_as_mat = match Mat::from_slice(im_bytes) {
        Ok(img_as_mat) => img_as_mat,
        Err(e) => {
            return Err(Error::from(e))
        }
    };

    let img_bgr = match imdecode(&img_as_mat, IMREAD_COLOR) {
        Ok(img_bgr) => img_bgr,
        Err(e) => {
            return Err(Error::from(e))
        }
    };

    if img_bgr.empty() {
        return Err(Error::msg("image - could not decode image bytes"))
    }
    Ok(img_bgr)
}

/// encode_image serializes a BGR matrix using the codec picked by `ext` (e.g. ".png").
pub fn encode_image(img: &Mat, ext: &str) -> Result<Vec<u8>, Error> {
    let mut buf: Vector<u8> = Vector::new();
    imencode(ext, img, &mut buf, &Vector::new())?;
    Ok(buf.to_vec())
}

pub fn read_image(path: &str) -> Result<Mat, Error> {
    let img = imread(path, IMREAD_COLOR)?;
    if img.empty() {
        return Err(Error::msg(format!("image - could not read {path}")))
    }
    Ok(img)
}

pub fn write_image(path: &str, img: &Mat) -> Result<(), Error> {
    if !imwrite(path, img, &Vector::new())? {
        return Err(Error::msg(format!("image - could not write {path}")))
    }
    Ok(())
}

/// mat_to_array3 copies an 8-bit 3-channel matrix into a (rows, cols, 3) float array.
pub fn mat_to_array3(img: &Mat) -> Result<Array3<f32>, Error> {
    if img.typ() != CV_8UC3 {
        return Err(Error::msg("image - expected an 8-bit 3-channel image"))
    }
    let img = img.try_clone()?;
    let (rows, cols) = (img.rows() as usize, img.cols() as usize);
    let data = img.data_typed::<Vec3b>()?;
    let mut arr = Array3::<f32>::zeros((rows, cols, 3));
    for (idx, px) in data.iter().enumerate() {
        let (y, x) = (idx / cols, idx % cols);
        for c in 0..3 {
            arr[[y, x, c]] = px[c] as f32;
        }
    }
    Ok(arr)
}

/// array3_to_mat clips a float image back into an 8-bit 3-channel matrix.
pub fn array3_to_mat(arr: &Array3<f32>) -> Result<Mat, Error> {
    let (rows, cols, _) = arr.dim();
    let mut img = Mat::new_rows_cols_with_default(rows as i32, cols as i32, CV_8UC3, Scalar::all(0.0))?;
    let data = img.data_typed_mut::<Vec3b>()?;
    for (idx, px) in data.iter_mut().enumerate() {
        let (y, x) = (idx / cols, idx % cols);
        for c in 0..3 {
            px[c] = saturate_u8(arr[[y, x, c]]);
        }
    }
    Ok(img)
}

/// mask_to_array2 reads an 8-bit single-channel mask as coverage in [0, 1].
pub fn mask_to_array2(mask: &Mat) -> Result<Array2<f32>, Error> {
    if mask.typ() != CV_8UC1 {
        return Err(Error::msg("image - expected an 8-bit single-channel mask"))
    }
    let mask = mask.try_clone()?;
    let (rows, cols) = (mask.rows() as usize, mask.cols() as usize);
    let data = mask.data_typed::<u8>()?;
    Array2::from_shape_vec((rows, cols), data.iter().map(|&v| v as f32 / 255.0).collect())
        .map_err(Error::from)
}

fn array2_to_mat_f32(arr: &Array2<f32>) -> Result<Mat, Error> {
    let (rows, cols) = arr.dim();
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, CV_32FC1, Scalar::all(0.0))?;
    let data = mat.data_typed_mut::<f32>()?;
    for (dst, src) in data.iter_mut().zip(arr.iter()) {
        *dst = *src;
    }
    Ok(mat)
}

fn mat_f32_to_array2(mat: &Mat) -> Result<Array2<f32>, Error> {
    let mat = mat.try_clone()?;
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let data = mat.data_typed::<f32>()?;
    Array2::from_shape_vec((rows, cols), data.to_vec()).map_err(Error::from)
}

/// gaussian_blur_array3 runs an OpenCV gaussian blur over a float image.
pub fn gaussian_blur_array3(arr: &Array3<f32>, ksize: i32) -> Result<Array3<f32>, Error> {
    let (rows, cols, _) = arr.dim();
    let mut src = Mat::new_rows_cols_with_default(rows as i32, cols as i32, CV_32FC3, Scalar::all(0.0))?;
    {
        let data = src.data_typed_mut::<Vec3f>()?;
        for (idx, px) in data.iter_mut().enumerate() {
            let (y, x) = (idx / cols, idx % cols);
            for c in 0..3 {
                px[c] = arr[[y, x, c]];
            }
        }
    }
    let mut dst = Mat::default();
    gaussian_blur_def(&src, &mut dst, Size::new(ksize, ksize), 0.0)?;

    let mut out = Array3::<f32>::zeros((rows, cols, 3));
    let data = dst.data_typed::<Vec3f>()?;
    for (idx, px) in data.iter().enumerate() {
        let (y, x) = (idx / cols, idx % cols);
        for c in 0..3 {
            out[[y, x, c]] = px[c];
        }
    }
    Ok(out)
}

pub fn gaussian_blur_array2(arr: &Array2<f32>, ksize: i32) -> Result<Array2<f32>, Error> {
    let src = array2_to_mat_f32(arr)?;
    let mut dst = Mat::default();
    gaussian_blur_def(&src, &mut dst, Size::new(ksize, ksize), 0.0)?;
    mat_f32_to_array2(&dst)
}

/// resize_array2 bilinearly resamples a float plane to `width` x `height`.
pub fn resize_array2(arr: &Array2<f32>, width: i32, height: i32) -> Result<Array2<f32>, Error> {
    let src = array2_to_mat_f32(arr)?;
    let mut dst = Mat::default();
    resize(&src, &mut dst, Size::new(width, height), 0.0, 0.0, INTER_LINEAR)?;
    mat_f32_to_array2(&dst)
}
