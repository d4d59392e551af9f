/// Macro to construct the root binding table
macro_rules! bind_table {
	( $scope:expr, $( $kind:ident / $vis:ident : $name:expr => $func:path ),*, ) => {
		$(
			$scope.$vis($name, make(crate::cell::ClosureKind::$kind, $func));
		)*
	};
}

/// Allows us to specify public mods as a list instead of repeating pub mod
macro_rules! pubmods {
	($($i:ident)*) => {
		$(
			pub mod $i;
		)*
	};
}
