use base::{Tensor, TensorError, element_count};

#[test]
fn test_tensor_new_valid() {
    let tensor = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(tensor.shape, vec![2, 3]);
    assert_eq!(tensor.ndim(), 2);
    assert_eq!(tensor.len(), 6);
}

#[test]
fn test_tensor_new_shape_mismatch() {
    let result = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0]);
    assert_eq!(
        result.unwrap_err(),
        TensorError::ShapeMismatch {
            expected: 6,
            got: 3
        }
    );
}

#[test]
fn test_tensor_new_overflow() {
    let result = Tensor::<f32>::new(vec![usize::MAX, 2], vec![]);
    assert!(matches!(result, Err(TensorError::ShapeOverflow)));
    assert!(element_count(&[usize::MAX, 2]).is_err());
}

#[test]
fn test_tensor_zeros_and_scalar() {
    let zeros = Tensor::<i64>::zeros(vec![2, 2]).unwrap();
    assert_eq!(zeros.data, vec![0; 4]);

    let scalar = Tensor::from_scalar(7i64);
    assert!(scalar.shape.is_empty());
    assert_eq!(scalar.data, vec![7]);
}

#[test]
fn test_tensor_reshape_keeps_data() {
    let tensor = Tensor::from_vec(vec![1, 2, 3, 4, 5, 6]);
    let reshaped = tensor.reshape(vec![3, 2]).unwrap();
    assert_eq!(reshaped.shape, vec![3, 2]);
    assert_eq!(reshaped.row(1), Some(&[3, 4][..]));
    assert!(reshaped.clone().reshape(vec![4, 2]).is_err());
}

#[test]
fn test_tensor_row_out_of_range() {
    let tensor = Tensor::new(vec![2, 2], vec![1, 2, 3, 4]).unwrap();
    assert_eq!(tensor.row(0), Some(&[1, 2][..]));
    assert_eq!(tensor.row(2), None);
}

#[test]
fn test_tensor_map_preserves_shape() {
    let tensor = Tensor::new(vec![1, 3], vec![1i64, 2, 3]).unwrap();
    let floats = tensor.map(|&v| v as f32 * 0.5);
    assert_eq!(floats.shape, vec![1, 3]);
    assert_eq!(floats.data, vec![0.5, 1.0, 1.5]);
}
