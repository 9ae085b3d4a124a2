//! The variant table the visitor disciplines generate their callbacks from.
//!
//! `with_node_variants!(m)` invokes `m!` with one group per [`Category`]. Each
//! group names the category's fallback callbacks followed by one row per node
//! variant with that variant's own callbacks, in the order
//! `preorder postorder revisit loop_revisit`. A discipline macro turns the
//! table into trait methods (variant falls back to category, category falls
//! back to the generic `*_node` callback) and into the `match` that dispatches
//! on [`NodeKind`].
//!
//! [`Category`]: crate::ir::node::Category
//! [`NodeKind`]: crate::ir::node::NodeKind

macro_rules! with_node_variants {
    ($mac:ident) => {
        $mac! {
            Declaration (preorder_declaration postorder_declaration revisit_declaration loop_revisit_declaration) {
                Program (preorder_program postorder_program revisit_program loop_revisit_program)
                Parser (preorder_parser postorder_parser revisit_parser loop_revisit_parser)
                ParserState (preorder_parser_state postorder_parser_state revisit_parser_state loop_revisit_parser_state)
                Control (preorder_control postorder_control revisit_control loop_revisit_control)
                Action (preorder_action postorder_action revisit_action loop_revisit_action)
                Table (preorder_table postorder_table revisit_table loop_revisit_table)
                Parameter (preorder_parameter postorder_parameter revisit_parameter loop_revisit_parameter)
                Variable (preorder_variable postorder_variable revisit_variable loop_revisit_variable)
            }
            Statement (preorder_statement postorder_statement revisit_statement loop_revisit_statement) {
                Block (preorder_block postorder_block revisit_block loop_revisit_block)
                Assign (preorder_assign postorder_assign revisit_assign loop_revisit_assign)
                OpAssign (preorder_op_assign postorder_op_assign revisit_op_assign loop_revisit_op_assign)
                If (preorder_if postorder_if revisit_if loop_revisit_if)
                CallStatement (preorder_call_statement postorder_call_statement revisit_call_statement loop_revisit_call_statement)
            }
            Expression (preorder_expression postorder_expression revisit_expression loop_revisit_expression) {
                Constant (preorder_constant postorder_constant revisit_constant loop_revisit_constant)
                PathExpr (preorder_path_expr postorder_path_expr revisit_path_expr loop_revisit_path_expr)
                Member (preorder_member postorder_member revisit_member loop_revisit_member)
                Binary (preorder_binary postorder_binary revisit_binary loop_revisit_binary)
                Unary (preorder_unary postorder_unary revisit_unary loop_revisit_unary)
                MethodCall (preorder_method_call postorder_method_call revisit_method_call loop_revisit_method_call)
                Select (preorder_select postorder_select revisit_select loop_revisit_select)
                SelectCase (preorder_select_case postorder_select_case revisit_select_case loop_revisit_select_case)
                Wildcard (preorder_wildcard postorder_wildcard revisit_wildcard loop_revisit_wildcard)
            }
            Type (preorder_type postorder_type revisit_type loop_revisit_type) {
                TypeBits (preorder_type_bits postorder_type_bits revisit_type_bits loop_revisit_type_bits)
                TypeName (preorder_type_name postorder_type_name revisit_type_name loop_revisit_type_name)
            }
        }
    };
}

pub(crate) use with_node_variants;

#[cfg(test)]
mod tests {
    use crate::ir::node::{Category, NodeKind};

    macro_rules! categories_of {
        ($(
            $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
                $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
            }
        )*) => {
            vec![$( $( (NodeKind::$variant, Category::$category), )* )*]
        };
    }

    #[test]
    fn test_table_agrees_with_node_categories() {
        let rows = super::with_node_variants!(categories_of);
        assert_eq!(rows.len(), 24);
        for (kind, category) in rows {
            assert_eq!(kind.category(), category, "{}", kind);
        }
    }
}
