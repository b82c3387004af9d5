//! Static OpenCL-C helper sources shared by every emitted kernel

/// CAS-loop atomic addition for doubles
pub const ATOMIC_DOUBLE_ADD: &str = r#"
  #pragma OPENCL EXTENSION cl_khr_int64_base_atomics: enable

  inline void AtomicAdd(volatile __global double *source, const double operand) {
    union { unsigned long intVal; double floatVal; } next, expected, current;
    current.floatVal = *source;
    do {
      expected.floatVal = current.floatVal;
      next.floatVal = expected.floatVal + operand;
      current.intVal = atom_cmpxchg((volatile __global unsigned long *)source, expected.intVal, next.intVal);
    } while( current.intVal != expected.intVal );
  }
"#;

/// CAS-loop atomic averaging for doubles
pub const ATOMIC_DOUBLE_AVERAGE: &str = r#"
  #pragma OPENCL EXTENSION cl_khr_int64_base_atomics: enable

  inline void AtomicAvg(volatile __global double *source, const double operand) {
    union { unsigned long intVal; double floatVal; } next, expected, current;
    current.floatVal = *source;
    do {
      expected.floatVal = current.floatVal;
      next.floatVal = (expected.floatVal + operand) / 2.0;
      current.intVal = atom_cmpxchg((volatile __global unsigned long *)source, expected.intVal, next.intVal);
    } while( current.intVal != expected.intVal );
  }
"#;

/// Xorshift random helper for dropout and stochastic truncation starts
pub const XORSHIFT_RANDOM: &str = r#"
  uint get_random_number(uint range, uint* state){
    uint seed = *state + get_global_id(0);
    uint t = seed ^ (seed << 11);
    uint result = seed ^ (seed >> 19) ^ (t ^ (t >> 8));
    *state = result;
    return result % range;
  }
"#;
