//! Argument builders for the calls with a known layout.
//!
//! Each builder has a matching shape function used by the registry.

use nblm_core::RpcValue;
use serde_json::json;

use crate::shape::ArgShape;

/// Number of `null` slots inside the create-notebook flag block.
const CREATE_FLAG_PADDING: usize = 9;

/// Client marker sent with most notebook calls.
fn marker() -> RpcValue {
    RpcValue::seq([2])
}

fn marker_shape() -> ArgShape {
    ArgShape::literal(json!([2]))
}

fn create_flags() -> RpcValue {
    let mut flags = vec![RpcValue::from(1)];
    flags.extend(std::iter::repeat_n(RpcValue::Null, CREATE_FLAG_PADDING));
    flags.push(RpcValue::seq([1]));
    RpcValue::Sequence(flags)
}

// ============================================================================
// Notebooks
// ============================================================================

/// `[null, 1, null, [2]]`
pub fn list_notebooks() -> Vec<RpcValue> {
    vec![RpcValue::Null, 1.into(), RpcValue::Null, marker()]
}

/// Shape of [`list_notebooks`].
pub fn list_notebooks_shape() -> ArgShape {
    ArgShape::tuple([
        ArgShape::Null,
        ArgShape::literal(json!(1)),
        ArgShape::Null,
        marker_shape(),
    ])
}

/// `[id, null, [2], null, 0]`
pub fn get_notebook(notebook_id: &str) -> Vec<RpcValue> {
    vec![
        notebook_id.into(),
        RpcValue::Null,
        marker(),
        RpcValue::Null,
        0.into(),
    ]
}

/// Shape of [`get_notebook`].
pub fn get_notebook_shape() -> ArgShape {
    ArgShape::tuple([
        ArgShape::Str,
        ArgShape::Null,
        marker_shape(),
        ArgShape::Null,
        ArgShape::literal(json!(0)),
    ])
}

/// `[title, null, null, [2], [1, null x9, [1]]]`
pub fn create_notebook(title: &str) -> Vec<RpcValue> {
    vec![
        title.into(),
        RpcValue::Null,
        RpcValue::Null,
        marker(),
        create_flags(),
    ]
}

/// Shape of [`create_notebook`].
pub fn create_notebook_shape() -> ArgShape {
    ArgShape::tuple([
        ArgShape::Str,
        ArgShape::Null,
        ArgShape::Null,
        marker_shape(),
        ArgShape::literal(json!([1, null, null, null, null, null, null, null, null, null, [1]])),
    ])
}

/// `[id, [[null, null, null, [null, title]]]]`
pub fn rename_notebook(notebook_id: &str, title: &str) -> Vec<RpcValue> {
    let update = RpcValue::seq([
        RpcValue::Null,
        RpcValue::Null,
        RpcValue::Null,
        RpcValue::seq([RpcValue::Null, title.into()]),
    ]);
    vec![notebook_id.into(), RpcValue::seq([update])]
}

/// Shape of [`rename_notebook`].
pub fn rename_notebook_shape() -> ArgShape {
    let update = ArgShape::tuple([
        ArgShape::Null,
        ArgShape::Null,
        ArgShape::Null,
        ArgShape::tuple([ArgShape::Null, ArgShape::Str]),
    ]);
    ArgShape::tuple([ArgShape::Str, ArgShape::tuple([update])])
}

/// `[[id], [2]]`
pub fn delete_notebook(notebook_id: &str) -> Vec<RpcValue> {
    vec![RpcValue::seq([notebook_id]), marker()]
}

/// Shape of [`delete_notebook`].
pub fn delete_notebook_shape() -> ArgShape {
    ArgShape::tuple([ArgShape::tuple([ArgShape::Str]), marker_shape()])
}

/// `[id, [2]]`
pub fn get_summary(notebook_id: &str) -> Vec<RpcValue> {
    vec![notebook_id.into(), marker()]
}

/// Shape of [`get_summary`].
pub fn get_summary_shape() -> ArgShape {
    ArgShape::tuple([ArgShape::Str, marker_shape()])
}

// ============================================================================
// Sources
// ============================================================================

/// `[[source_id], [2], [2]]`
pub fn get_source(source_id: &str) -> Vec<RpcValue> {
    vec![RpcValue::seq([source_id]), marker(), marker()]
}

/// Shape of [`get_source`].
pub fn get_source_shape() -> ArgShape {
    ArgShape::tuple([ArgShape::tuple([ArgShape::Str]), marker_shape(), marker_shape()])
}

/// `[[[[source_id]]]]`
pub fn get_source_guide(source_id: &str) -> Vec<RpcValue> {
    vec![RpcValue::seq([RpcValue::seq([RpcValue::seq([source_id])])])]
}

/// Shape of [`get_source_guide`].
pub fn get_source_guide_shape() -> ArgShape {
    ArgShape::tuple([ArgShape::tuple([ArgShape::tuple([ArgShape::tuple([
        ArgShape::Str,
    ])])])])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(args: &[RpcValue]) -> String {
        RpcValue::encode_args(args).unwrap()
    }

    #[test]
    fn test_list_notebooks() {
        let args = list_notebooks();
        assert_eq!(wire(&args), "[null,1,null,[2]]");
        list_notebooks_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_get_notebook() {
        let args = get_notebook("nb-1");
        assert_eq!(wire(&args), r#"["nb-1",null,[2],null,0]"#);
        get_notebook_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_create_notebook_keeps_null_padding() {
        let args = create_notebook("Research");
        assert_eq!(
            wire(&args),
            r#"["Research",null,null,[2],[1,null,null,null,null,null,null,null,null,null,[1]]]"#
        );
        create_notebook_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_rename_notebook() {
        let args = rename_notebook("nb-1", "New title");
        assert_eq!(wire(&args), r#"["nb-1",[[null,null,null,[null,"New title"]]]]"#);
        rename_notebook_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_delete_notebook() {
        let args = delete_notebook("nb-1");
        assert_eq!(wire(&args), r#"[["nb-1"],[2]]"#);
        delete_notebook_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_get_summary() {
        let args = get_summary("nb-1");
        assert_eq!(wire(&args), r#"["nb-1",[2]]"#);
        get_summary_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_source_calls() {
        let args = get_source("src-1");
        assert_eq!(wire(&args), r#"[["src-1"],[2],[2]]"#);
        get_source_shape().validate_args(&args).unwrap();

        let args = get_source_guide("src-1");
        assert_eq!(wire(&args), r#"[[[["src-1"]]]]"#);
        get_source_guide_shape().validate_args(&args).unwrap();
    }

    #[test]
    fn test_shapes_reject_swapped_builders() {
        let err = get_notebook_shape()
            .validate_args(&get_summary("nb-1"))
            .unwrap_err();
        assert_eq!(err.path, "args");

        let err = delete_notebook_shape()
            .validate_args(&get_summary("nb-1"))
            .unwrap_err();
        assert_eq!(err.path, "args[0]");
    }
}
