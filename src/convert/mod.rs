#[cfg(feature = "bytecode")]
mod bytecode;

#[cfg(feature = "bytecode")]
#[cfg(test)]
mod tests;
